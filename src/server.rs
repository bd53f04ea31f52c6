use crate::acceptor::ConnectionAcceptor;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::event_loop::{EventLoop, EventPoller};
use crate::pool::WorkerPool;
use crate::slab::{ConnectionSlab, Token};
use crate::stats::ServerStats;
use log::info;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ignore SIGPIPE so that writing to a peer that has gone away surfaces as
/// an `EPIPE` error on that connection instead of killing the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Requests a running server to stop.
///
/// The reactor notices within one poll timeout.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A bound, ready-to-run file server
pub struct Server {
    config: ServerConfig,
    local_addr: SocketAddr,
    event_loop: EventLoop,
    slab: Arc<ConnectionSlab>,
    stats: Arc<ServerStats>,
}

impl Server {
    /// Validate `config`, bind the listening socket and start the worker
    /// threads. Nothing is accepted until [`Server::run`].
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        info!("configuration: {}", serde_json::to_string(&config)?);

        let poller = Arc::new(EventPoller::new()?);
        let acceptor = ConnectionAcceptor::new(config.socket_address(), config.backlog)?;
        let local_addr = acceptor.local_addr()?;
        poller.add_listener(acceptor.as_raw_fd())?;

        let stats = Arc::new(ServerStats::new());
        let slab = Arc::new(ConnectionSlab::new(&config, poller.clone(), stats.clone())?);

        let worker_slab = slab.clone();
        let pool = WorkerPool::new(config.worker_threads, config.max_queue_depth, move |token: Token| {
            worker_slab.process(token)
        })?;

        let event_loop = EventLoop::new(
            poller,
            acceptor,
            slab.clone(),
            pool,
            stats.clone(),
            ShutdownHandle::new(),
            config.max_events,
            config.poll_timeout_ms,
        );

        Ok(Self {
            config,
            local_addr,
            event_loop,
            slab,
            stats,
        })
    }

    /// Address the listening socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.event_loop.shutdown_handle()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Run the reactor on the calling thread until shutdown is triggered.
    pub fn run(mut self) -> ServerResult<()> {
        info!(
            "serving {} on {} with {} worker threads",
            self.config.doc_root.display(),
            self.local_addr,
            self.config.worker_threads
        );

        let result = self.event_loop.run();
        info!(
            "server stopped ({} connections still open): {}",
            self.slab.live(),
            self.stats.format()
        );
        result
    }
}
