use crate::error::{ServerError, ServerResult};
use crate::pool::{DEFAULT_MAX_REQUESTS, DEFAULT_THREADS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Document root used when none is supplied
pub const DEFAULT_DOC_ROOT: &str = "/var/www/html";

/// Server configuration
///
/// Every resource ceiling of the server lives here. Nothing is negotiated
/// with clients; the values are fixed for the lifetime of a `Server`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,
    pub backlog: i32,

    // Worker pool
    pub worker_threads: usize,
    pub max_queue_depth: usize,

    // Reactor
    pub max_connections: usize,
    pub max_events: usize,
    pub poll_timeout_ms: i32,

    // Per-connection buffers
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,

    // Filesystem
    pub doc_root: PathBuf,
    pub max_path_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
            backlog: 1024,

            worker_threads: DEFAULT_THREADS,
            max_queue_depth: DEFAULT_MAX_REQUESTS,

            max_connections: 4096,
            max_events: 10_000,
            poll_timeout_ms: 100,

            read_buffer_size: 2048,
            write_buffer_size: 2048,

            doc_root: PathBuf::from(DEFAULT_DOC_ROOT),
            max_path_len: 200,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the maximum number of queued requests
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the maximum number of concurrently open connections
    pub fn with_max_connections(mut self, connections: usize) -> Self {
        self.max_connections = connections;
        self
    }

    /// Set the per-connection read and write buffer sizes
    pub fn with_buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Set the directory files are served from
    pub fn with_doc_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.doc_root = root.into();
        self
    }

    /// Set the longest filesystem path (root + target) that will be resolved
    pub fn with_max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = len;
        self
    }

    /// Set how long a single readiness wait may block
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Reject configurations the server cannot be built from
    pub fn validate(&self) -> ServerResult<()> {
        let checks = [
            (self.worker_threads == 0, "worker_threads must be positive"),
            (self.max_queue_depth == 0, "max_queue_depth must be positive"),
            (self.max_connections == 0, "max_connections must be positive"),
            (self.max_connections >= u32::MAX as usize, "max_connections does not fit a token"),
            (self.max_events == 0, "max_events must be positive"),
            (self.read_buffer_size == 0, "read_buffer_size must be positive"),
            (self.write_buffer_size == 0, "write_buffer_size must be positive"),
            (!self.doc_root.is_absolute(), "doc_root must be an absolute path"),
        ];
        if let Some((_, reason)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(ServerError::Config(reason.to_string()));
        }

        let root_len = self.doc_root.as_os_str().len();
        if self.max_path_len <= root_len {
            return Err(ServerError::Config(format!(
                "max_path_len ({}) leaves no room after doc_root ({} bytes)",
                self.max_path_len, root_len
            )));
        }

        Ok(())
    }
}
