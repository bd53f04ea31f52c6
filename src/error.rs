use std::io;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("read buffer exhausted ({capacity} bytes)")]
    BufferFull { capacity: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
