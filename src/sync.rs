//! Counting semaphore used to signal work availability.
//!
//! The work queue itself is a `parking_lot::Mutex`; this is the
//! wait/signal half. Each `post` releases exactly one `wait`, so a
//! producer that appends N items wakes at most N consumers.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore built on a mutex-guarded permit count
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` initial permits
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take a permit if one is available without blocking
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Block for at most `timeout` waiting for a permit.
    ///
    /// Returns `false` if the timeout elapsed with no permit taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() && *permits == 0 {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Release one permit, waking a single waiter
    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    /// Release `n` permits at once
    pub fn post_many(&self, n: usize) {
        let mut permits = self.permits.lock();
        *permits += n;
        self.available.notify_all();
    }

    /// Current number of unclaimed permits
    pub fn permits(&self) -> usize {
        *self.permits.lock()
    }
}
