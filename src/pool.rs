use crate::error::{ServerError, ServerResult};
use crate::sync::Semaphore;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 8;

/// Default bound on queued work items
pub const DEFAULT_MAX_REQUESTS: usize = 10_000;

struct Queue<T> {
    items: VecDeque<T>,
    stopping: bool,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    // One permit per queued item, plus one per worker once stopping.
    available: Semaphore,
    // Posted by each worker as it exits.
    exited: Semaphore,
}

/// A fixed set of threads servicing a bounded FIFO queue.
///
/// Items are handed to `handler` in submission order. A full queue rejects
/// new items instead of blocking the submitter.
pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
    max_requests: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `thread_count` workers that pass each dequeued item to `handler`
    pub fn new<F>(thread_count: usize, max_requests: usize, handler: F) -> ServerResult<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if thread_count == 0 {
            return Err(ServerError::WorkerPool("thread count must be positive".to_string()));
        }
        if max_requests == 0 {
            return Err(ServerError::WorkerPool("queue bound must be positive".to_string()));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(max_requests.min(1024)),
                stopping: false,
            }),
            available: Semaphore::new(0),
            exited: Semaphore::new(0),
        });
        let handler = Arc::new(handler);

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(thread_count),
            max_requests,
        };

        for id in 0..thread_count {
            let shared = pool.shared.clone();
            let handler = handler.clone();
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker_loop(id, shared, handler));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(ServerError::Io(e));
                }
            }
        }
        debug!("worker pool started: {} threads, queue bound {}", thread_count, max_requests);

        Ok(pool)
    }

    /// Queue an item for processing.
    ///
    /// Never blocks. When the queue is at its bound, or the pool is shutting
    /// down, the item is handed back unchanged.
    pub fn submit(&self, item: T) -> Result<(), T> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopping || queue.items.len() >= self.max_requests {
                return Err(item);
            }
            queue.items.push_back(item);
        }
        self.shared.available.post();
        Ok(())
    }

    /// Number of items waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Number of live worker threads
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    fn signal_stop(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.stopping {
                return;
            }
            queue.stopping = true;
        }
        self.shared.available.post_many(self.workers.len());
    }

    /// Stop accepting work, let the workers drain the queue and join them.
    pub fn shutdown(&mut self) {
        self.signal_stop();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
    }

    /// Like [`WorkerPool::shutdown`] but gives up after `timeout`.
    ///
    /// Returns `false` if some workers were still busy at the deadline; those
    /// threads are detached and finish on their own.
    pub fn shutdown_timeout(&mut self, timeout: Duration) -> bool {
        if self.workers.is_empty() {
            return true;
        }
        self.signal_stop();

        let deadline = Instant::now() + timeout;
        for exited in 0..self.workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.shared.exited.wait_timeout(remaining) {
                warn!(
                    "{} of {} workers still busy after {:?}; detaching",
                    self.workers.len() - exited,
                    self.workers.len(),
                    timeout
                );
                self.workers.clear();
                return false;
            }
        }

        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        true
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T, F>(id: usize, shared: Arc<Shared<T>>, handler: Arc<F>)
where
    F: Fn(T),
{
    loop {
        shared.available.wait();

        let item = {
            let mut queue = shared.queue.lock();
            match queue.items.pop_front() {
                Some(item) => item,
                None if queue.stopping => break,
                None => continue,
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(|| handler(item))).is_err() {
            error!("worker {} recovered from a panicking task", id);
        }
    }

    debug!("worker {} exiting", id);
    shared.exited.post();
}
