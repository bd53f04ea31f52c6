use crate::config::ServerConfig;
use crate::connection::{Connection, Next};
use crate::error::{ServerError, ServerResult};
use crate::event_loop::{EventPoller, Interest};
use crate::files::DocumentRoot;
use crate::stats::ServerStats;
use crossbeam::queue::ArrayQueue;
use log::{debug, error};
use parking_lot::{Mutex, MutexGuard};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// epoll user data reserved for the listening socket
pub const LISTENER_TOKEN: u64 = u64::MAX;

/// Handle to a connection slot: its index plus the generation the slot had
/// when the connection was accepted.
///
/// Slots are reused, so a token whose generation no longer matches refers to
/// a connection that has already been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into epoll user data: generation in the high half, index in the low
    pub fn as_u64(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_u64(data: u64) -> Self {
        Self {
            index: data as u32,
            generation: (data >> 32) as u32,
        }
    }
}

/// Preallocated table of connections.
///
/// Every slot is built up front with its buffers; accepting a socket pops a
/// free slot index and closing pushes it back. The per-slot mutex is only
/// held by whichever side currently owns the connection (the reactor or a
/// single worker), so it is never contended in practice.
pub struct ConnectionSlab {
    slots: Box<[Mutex<Connection>]>,
    free: ArrayQueue<usize>,
    live: AtomicUsize,
    poller: Arc<EventPoller>,
    root: DocumentRoot,
    stats: Arc<ServerStats>,
}

impl ConnectionSlab {
    pub fn new(
        config: &ServerConfig,
        poller: Arc<EventPoller>,
        stats: Arc<ServerStats>,
    ) -> ServerResult<Self> {
        let capacity = config.max_connections;
        if capacity == 0 || capacity >= u32::MAX as usize {
            return Err(ServerError::Config(format!(
                "cannot build a connection table of {} slots",
                capacity
            )));
        }

        let slots: Box<[Mutex<Connection>]> = (0..capacity)
            .map(|_| {
                Mutex::new(Connection::new(
                    config.read_buffer_size,
                    config.write_buffer_size,
                ))
            })
            .collect();

        let free = ArrayQueue::new(capacity);
        for index in 0..capacity {
            let _ = free.push(index);
        }

        Ok(Self {
            slots,
            free,
            live: AtomicUsize::new(0),
            poller,
            root: DocumentRoot::new(config.doc_root.clone(), config.max_path_len),
            stats,
        })
    }

    /// Admit a freshly accepted socket and register it for read readiness.
    ///
    /// Returns `Ok(None)` when the table is full; the socket is dropped,
    /// which closes it.
    pub fn insert(&self, stream: TcpStream, addr: SocketAddr) -> ServerResult<Option<Token>> {
        let capacity = self.slots.len();
        let admitted = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < capacity).then_some(live + 1)
            });
        let live = match admitted {
            Ok(previous) => previous + 1,
            Err(_) => {
                self.stats.record_capacity_reject();
                return Ok(None);
            }
        };

        let Some(index) = self.free.pop() else {
            self.live.fetch_sub(1, Ordering::AcqRel);
            self.stats.record_capacity_reject();
            return Ok(None);
        };

        let mut conn = self.slots[index].lock();
        let generation = conn.generation().wrapping_add(1);
        let fd = stream.as_raw_fd();
        conn.open(stream, addr, generation);

        let token = Token::new(index as u32, generation);
        if let Err(e) = self.poller.add(fd, token.as_u64(), Interest::Read) {
            drop(conn.release());
            drop(conn);
            let _ = self.free.push(index);
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }

        self.stats.record_accept(live);
        Ok(Some(token))
    }

    /// Lock the connection `token` refers to, if it is still open under the
    /// same generation
    pub fn get(&self, token: Token) -> Option<MutexGuard<'_, Connection>> {
        let conn = self.slots.get(token.index())?.lock();
        if conn.is_open() && conn.generation() == token.generation() {
            Some(conn)
        } else {
            None
        }
    }

    /// Close the connection if `token` is still current
    pub fn close(&self, token: Token) {
        if let Some(conn) = self.get(token) {
            self.close_locked(token, conn);
        }
    }

    /// Deregister, close the socket and return the slot to the free list.
    ///
    /// The slot is pushed back before the live count drops, so a successful
    /// admission always finds a free slot.
    pub fn close_locked(&self, token: Token, mut conn: MutexGuard<'_, Connection>) {
        let Some(stream) = conn.release() else {
            return;
        };
        if let Err(e) = self.poller.delete(stream.as_raw_fd()) {
            debug!("{:?}: epoll delete failed: {}", token, e);
        }
        drop(stream);
        drop(conn);

        let _ = self.free.push(token.index());
        let live = self.live.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.stats.record_close(live);
    }

    /// Re-arm the connection for `interest` and give up ownership of it.
    ///
    /// The guard is released only after the registration is updated.
    pub fn rearm(&self, token: Token, conn: MutexGuard<'_, Connection>, interest: Interest) {
        let Some(fd) = conn.raw_fd() else {
            return;
        };
        if let Err(e) = self.poller.modify(fd, token.as_u64(), interest) {
            debug!("{:?}: re-arm for {:?} failed: {}", token, interest, e);
            self.close_locked(token, conn);
        }
    }

    /// Worker entry point: parse what the reactor has read and hand the
    /// connection back armed for whatever comes next.
    pub fn process(&self, token: Token) {
        self.process_with(token, |conn, root| conn.process(root));
    }

    /// Run `step` on the connection behind `token` and act on the [`Next`]
    /// it returns.
    ///
    /// A panic inside `step` closes the connection and frees its slot.
    pub fn process_with<F>(&self, token: Token, step: F)
    where
        F: FnOnce(&mut Connection, &DocumentRoot) -> Next,
    {
        let Some(mut conn) = self.get(token) else {
            debug!("{:?}: stale work item", token);
            return;
        };

        let root = &self.root;
        let next = match panic::catch_unwind(AssertUnwindSafe(|| step(&mut *conn, root))) {
            Ok(next) => next,
            Err(_) => {
                error!("{:?}: request handling panicked; closing", token);
                self.close_locked(token, conn);
                return;
            }
        };

        match next {
            Next::AwaitRead => self.rearm(token, conn, Interest::Read),
            Next::AwaitWrite => {
                if let Some(status) = conn.response_status() {
                    self.stats.record_response(status);
                }
                self.rearm(token, conn, Interest::Write);
            }
            Next::Close => {
                debug!("{:?}: response did not fit the write buffer; closing", token);
                self.close_locked(token, conn);
            }
        }
    }

    /// Close every open connection
    pub fn close_all(&self) {
        for (index, slot) in self.slots.iter().enumerate() {
            let conn = slot.lock();
            if conn.is_open() {
                let token = Token::new(index as u32, conn.generation());
                self.close_locked(token, conn);
            }
        }
    }

    /// Number of open connections
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots available for new connections
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn document_root(&self) -> &DocumentRoot {
        &self.root
    }
}
