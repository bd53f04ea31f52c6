#[cfg(not(target_os = "linux"))]
compile_error!("mmap-httpd is built on epoll and only supports Linux");

pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod files;
pub mod http;
pub mod pool;
pub mod server;
pub mod slab;
pub mod stats;
pub mod sync;

/// Re-exports of common components for easier access
pub use acceptor::ConnectionAcceptor;
pub use buffer::Buffer;
pub use config::{ServerConfig, DEFAULT_DOC_ROOT};
pub use connection::{Connection, Next, WriteStatus};
pub use error::{ServerError, ServerResult};
pub use event_loop::{EventLoop, EventPoller, Events, Interest};
pub use files::{DocumentRoot, MappedFile};
pub use http::{CheckState, HttpCode, LineStatus, Method, RequestParser, Status};
pub use pool::WorkerPool;
pub use server::{ignore_sigpipe, Server, ShutdownHandle};
pub use slab::{ConnectionSlab, Token};
pub use stats::ServerStats;
pub use sync::Semaphore;
