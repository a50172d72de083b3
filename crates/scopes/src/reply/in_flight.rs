//! Counter of deliveries in progress

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counts operations in progress and lets a terminal call wait, with an
/// upper bound, until none are left
#[derive(Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; it ends when the guard is dropped
    pub fn enter(&self) -> InFlightGuard<'_> {
        *self.count.lock() += 1;
        InFlightGuard { owner: self }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until no operation is in progress or `timeout` elapsed.
    /// Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.leave();
    }
}
