use crate::acceptor::ConnectionAcceptor;
use crate::connection::WriteStatus;
use crate::error::{ServerError, ServerResult};
use crate::http::Status;
use crate::pool::WorkerPool;
use crate::server::ShutdownHandle;
use crate::slab::{ConnectionSlab, Token, LISTENER_TOKEN};
use crate::stats::ServerStats;
use log::{debug, info, trace, warn};
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP};

/// Which readiness a connection is armed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn flags(self) -> u32 {
        let base = match self {
            Interest::Read => EPOLLIN,
            Interest::Write => EPOLLOUT,
        };
        (base | EPOLLONESHOT | EPOLLRDHUP) as u32
    }
}

/// Readiness events filled in by [`EventPoller::poll`]
pub struct Events {
    inner: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    /// Room for at most `capacity` events per poll
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.len()
    }

    /// `(user data, event flags)` for every event of the last poll
    pub fn iter(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        // epoll_event is packed on some targets; copy the fields out by value.
        self.inner[..self.len].iter().map(|event| (event.u64, event.events))
    }
}

/// Thin wrapper over an epoll instance.
///
/// Connection sockets are registered one-shot: after an event is reported
/// the descriptor stays silent until [`EventPoller::modify`] re-arms it. The
/// listening socket is level-triggered and never needs re-arming.
pub struct EventPoller {
    epoll_fd: RawFd,
}

impl EventPoller {
    /// Create a new event poller
    pub fn new() -> ServerResult<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }
        Ok(Self { epoll_fd })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, data: u64) -> ServerResult<()> {
        let mut event = libc::epoll_event { events, u64: data };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Register a connection socket, one-shot
    pub fn add(&self, fd: RawFd, data: u64, interest: Interest) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest.flags(), data)
    }

    /// Register the listening socket, level-triggered
    pub fn add_listener(&self, fd: RawFd) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, EPOLLIN as u32, LISTENER_TOKEN)
    }

    /// Re-arm a one-shot registration for the given interest
    pub fn modify(&self, fd: RawFd, data: u64, interest: Interest) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest.flags(), data)
    }

    /// Deregister a socket
    pub fn delete(&self, fd: RawFd) -> ServerResult<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Wait for events with a timeout.
    ///
    /// An interrupted wait reports zero events rather than an error.
    pub fn poll(&self, events: &mut Events, timeout_ms: i32) -> ServerResult<usize> {
        let max_events = events.inner.len().min(i32::MAX as usize) as i32;
        let num_events = unsafe {
            libc::epoll_wait(self.epoll_fd, events.inner.as_mut_ptr(), max_events, timeout_ms)
        };

        if num_events < 0 {
            events.len = 0;
            let err = io::Error::last_os_error();
            // Ignore EINTR as it's just a signal interruption
            if err.kind() != ErrorKind::Interrupted {
                return Err(ServerError::Io(err));
            }
            return Ok(0);
        }

        events.len = num_events as usize;
        Ok(events.len)
    }
}

impl Drop for EventPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// The reactor: the only thread that waits on epoll and the one that
/// performs socket reads and writes.
///
/// Parsing and response formatting happen on the worker pool; the
/// one-shot registrations guarantee that a connection is only ever in the
/// hands of one side at a time.
pub struct EventLoop {
    poller: Arc<EventPoller>,
    acceptor: ConnectionAcceptor,
    slab: Arc<ConnectionSlab>,
    pool: WorkerPool<Token>,
    events: Events,
    stats: Arc<ServerStats>,
    shutdown: ShutdownHandle,
    poll_timeout_ms: i32,
}

impl EventLoop {
    /// Assemble a reactor. The acceptor must already be registered with
    /// `poller` via [`EventPoller::add_listener`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        poller: Arc<EventPoller>,
        acceptor: ConnectionAcceptor,
        slab: Arc<ConnectionSlab>,
        pool: WorkerPool<Token>,
        stats: Arc<ServerStats>,
        shutdown: ShutdownHandle,
        max_events: usize,
        poll_timeout_ms: i32,
    ) -> Self {
        Self {
            poller,
            acceptor,
            slab,
            pool,
            events: Events::with_capacity(max_events),
            stats,
            shutdown,
            poll_timeout_ms,
        }
    }

    /// Poll and dispatch until shutdown is requested or epoll fails.
    ///
    /// Either way the worker pool is drained and joined, and every live
    /// connection is closed before this returns.
    pub fn run(&mut self) -> ServerResult<()> {
        let result = self.poll_loop();
        self.teardown();
        result
    }

    fn poll_loop(&mut self) -> ServerResult<()> {
        while !self.shutdown.is_triggered() {
            // Wake at least once per timeout to notice shutdown
            self.poller
                .poll(&mut self.events, self.poll_timeout_ms)
                .map_err(|e| ServerError::EventLoop(format!("epoll_wait failed: {}", e)))?;

            // Handle ready events
            for (data, flags) in self.events.iter() {
                self.dispatch(data, flags);
            }
        }
        info!("shutdown requested; stopping event loop");
        Ok(())
    }

    fn dispatch(&self, data: u64, flags: u32) {
        if data == LISTENER_TOKEN {
            self.on_acceptable();
            return;
        }

        let token = Token::from_u64(data);

        // Hangup and error win over pending readable bytes
        if flags & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32 != 0 {
            debug!("{:?}: peer hung up", token);
            self.slab.close(token);
        } else if flags & EPOLLIN as u32 != 0 {
            self.on_readable(token);
        } else if flags & EPOLLOUT as u32 != 0 {
            self.on_writable(token);
        } else {
            trace!("{:?}: ignoring events {:#x}", token, flags);
        }
    }

    fn on_acceptable(&self) {
        let (stream, addr) = match self.acceptor.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("accept failed: {}", e);
                return;
            }
        };

        // Admit and register for the first read
        match self.slab.insert(stream, addr) {
            Ok(Some(token)) => debug!("{:?}: accepted {}", token, addr),
            Ok(None) => warn!(
                "connection limit ({}) reached; dropping {}",
                self.slab.capacity(),
                addr
            ),
            Err(e) => warn!("failed to register {}: {}", addr, e),
        }
    }

    fn on_readable(&self, token: Token) {
        // Drain the socket while holding the slot, then let it go before
        // a worker can pick it up
        {
            let Some(mut conn) = self.slab.get(token) else {
                trace!("{:?}: stale read event", token);
                return;
            };
            if let Err(e) = conn.read() {
                debug!("{:?}: closing after read: {}", token, e);
                self.slab.close_locked(token, conn);
                return;
            }
        }

        // Hand the request to the worker pool
        let Err(token) = self.pool.submit(token) else {
            return;
        };

        // Queue full: answer 503 from the reactor and close after sending
        self.stats.record_queue_reject();
        warn!(
            "{:?}: work queue full ({} queued); answering 503",
            token,
            self.pool.max_requests()
        );
        let Some(mut conn) = self.slab.get(token) else {
            return;
        };
        if conn.reject_busy() {
            self.stats.record_response(Status::ServiceUnavailable);
            self.slab.rearm(token, conn, Interest::Write);
        } else {
            self.slab.close_locked(token, conn);
        }
    }

    fn on_writable(&self, token: Token) {
        let Some(mut conn) = self.slab.get(token) else {
            trace!("{:?}: stale write event", token);
            return;
        };

        // Send as much of the head and body as the socket takes
        match conn.write() {
            Ok(WriteStatus::Pending) => self.slab.rearm(token, conn, Interest::Write),
            Ok(WriteStatus::Done { keep_alive, sent }) => {
                self.stats.record_bytes_sent(sent);
                if keep_alive {
                    self.slab.rearm(token, conn, Interest::Read);
                } else {
                    debug!("{:?}: response sent; closing", token);
                    self.slab.close_locked(token, conn);
                }
            }
            Err(e) => {
                debug!("{:?}: closing after write: {}", token, e);
                self.slab.close_locked(token, conn);
            }
        }
    }

    fn teardown(&mut self) {
        let queued = self.pool.queued();
        self.pool.shutdown();
        debug!("worker pool stopped after draining {} queued items", queued);

        let live = self.slab.live();
        self.slab.close_all();
        info!("closed {} live connections", live);
    }

    /// Handle that stops [`EventLoop::run`] from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}
