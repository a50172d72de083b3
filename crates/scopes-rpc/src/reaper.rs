//! Idle-item reaper
//!
//! A reaper evicts items that have not been refreshed within an expiry
//! interval. Each item is represented by a callback; the caller keeps the
//! returned [`ReapItem`] and calls [`ReapItem::refresh`] whenever the item is
//! used. Items that stay idle for longer than the expiry interval have their
//! callback invoked from the reaper thread and are then forgotten.
//!
//! One background thread serves all items of a reaper. It wakes up once the
//! oldest item could have expired (but no more often than the reap interval),
//! collects every expired item and runs the callbacks without holding the
//! schedule lock, so callbacks may freely add, refresh or cancel items.

use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use crate::error::{panic_message, MiddlewareError, Result};

/// Eviction callback
pub type ReapCallback = Arc<dyn Fn() + Send + Sync>;

/// What happens to live items when the reaper is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyPolicy {
    /// Invoke the callback of every remaining item
    CallbackOnDestroy,
    /// Forget remaining items silently
    NoCallbackOnDestroy,
}

struct Entry {
    touched: Instant,
    callback: ReapCallback,
}

#[derive(Default)]
struct Schedule {
    /// (last touched, id), oldest first
    order: BTreeSet<(Instant, u64)>,
    entries: HashMap<u64, Entry>,
    next_id: u64,
    finished: bool,
    reaping: bool,
    reaper_thread: Option<ThreadId>,
}

impl Schedule {
    fn remove(&mut self, id: u64) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.order.remove(&(entry.touched, id));
        Some(entry)
    }
}

/// Wait for a running pass to finish, unless we are that pass
fn wait_for_pass(sched: &mut MutexGuard<'_, Schedule>, done: &Condvar) {
    let me = thread::current().id();
    while sched.reaping && sched.reaper_thread != Some(me) {
        done.wait(sched);
    }
}

struct Shared {
    schedule: Mutex<Schedule>,
    work: Condvar,
    reap_done: Condvar,
    reap_interval: Duration,
    expiry: Duration,
    policy: DestroyPolicy,
}

/// Time-based evictor for idle items
pub struct Reaper {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Create a reaper and start its thread.
    ///
    /// `reap_interval` bounds how often the thread scans; it must be non-zero
    /// and no larger than `expiry`.
    pub fn new(reap_interval: Duration, expiry: Duration, policy: DestroyPolicy) -> Result<Self> {
        if reap_interval.is_zero() {
            return Err(MiddlewareError::InvalidArgument(
                "Reaper: reap interval must be greater than zero".to_string(),
            ));
        }
        if reap_interval > expiry {
            return Err(MiddlewareError::InvalidArgument(format!(
                "Reaper: reap interval ({:?}) must be <= expiry interval ({:?})",
                reap_interval, expiry
            )));
        }

        let shared = Arc::new(Shared {
            schedule: Mutex::new(Schedule::default()),
            work: Condvar::new(),
            reap_done: Condvar::new(),
            reap_interval,
            expiry,
            policy,
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("reaper".to_string())
            .spawn(move || reap_loop(thread_shared))?;

        debug!(
            "Reaper started: interval={:?} expiry={:?} policy={:?}",
            reap_interval, expiry, policy
        );

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Register an item. The callback runs once if the item expires.
    pub fn add<F>(&self, callback: F) -> Result<ReapItem>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut sched = self.shared.schedule.lock();
        if sched.finished {
            return Err(MiddlewareError::Logic(
                "Reaper: cannot add item to destroyed reaper".to_string(),
            ));
        }

        let id = sched.next_id;
        sched.next_id += 1;
        let now = Instant::now();
        let was_empty = sched.entries.is_empty();
        sched.entries.insert(
            id,
            Entry {
                touched: now,
                callback: Arc::new(callback),
            },
        );
        sched.order.insert((now, id));

        if was_empty {
            self.shared.work.notify_one();
        }

        Ok(ReapItem {
            shared: Arc::downgrade(&self.shared),
            id,
        })
    }

    /// Number of live items
    pub fn size(&self) -> usize {
        self.shared.schedule.lock().entries.len()
    }

    pub fn expiry(&self) -> Duration {
        self.shared.expiry
    }

    /// Stop the reaper thread. With [`DestroyPolicy::CallbackOnDestroy`] the
    /// callbacks of all remaining items run before this returns.
    pub fn destroy(&self) {
        {
            let mut sched = self.shared.schedule.lock();
            if sched.finished {
                return;
            }
            sched.finished = true;
        }
        self.shared.work.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Reaper thread terminated abnormally");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Handle to a registered item. Dropping it cancels the item.
pub struct ReapItem {
    shared: Weak<Shared>,
    id: u64,
}

impl ReapItem {
    /// Mark the item as used now
    pub fn refresh(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut guard = shared.schedule.lock();
        let sched = &mut *guard;
        let id = self.id;
        if let Some(entry) = sched.entries.get_mut(&id) {
            let old = entry.touched;
            let now = Instant::now();
            entry.touched = now;
            sched.order.remove(&(old, id));
            sched.order.insert((now, id));
        }
    }

    /// Remove the item without invoking its callback. If a reaping pass is
    /// in progress on another thread, waits for it to complete so that the
    /// callback cannot run after this returns.
    pub fn cancel(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut sched = shared.schedule.lock();
        let removed = sched.remove(self.id);
        wait_for_pass(&mut sched, &shared.reap_done);
        drop(sched);
        drop(removed);
    }
}

impl Drop for ReapItem {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_callbacks(callbacks: Vec<ReapCallback>) {
    for callback in callbacks {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (*callback)())) {
            error!("Reaper: callback failed: {}", panic_message(&*payload));
        }
    }
}

fn reap_loop(shared: Arc<Shared>) {
    let mut sched = shared.schedule.lock();
    sched.reaper_thread = Some(thread::current().id());

    loop {
        if sched.finished {
            break;
        }

        match sched.order.first().copied() {
            None => shared.work.wait(&mut sched),
            Some((oldest, _)) => {
                let wait = shared
                    .expiry
                    .saturating_sub(oldest.elapsed())
                    .max(shared.reap_interval);
                shared.work.wait_for(&mut sched, wait);
            }
        }

        if sched.finished {
            break;
        }

        let now = Instant::now();
        let mut zombies = Vec::new();
        while let Some((touched, id)) = sched.order.first().copied() {
            if now < touched + shared.expiry {
                break;
            }
            if let Some(entry) = sched.remove(id) {
                zombies.push(entry.callback);
            }
        }

        if zombies.is_empty() {
            continue;
        }

        debug!("Reaper: evicting {} idle item(s)", zombies.len());
        sched.reaping = true;
        MutexGuard::unlocked(&mut sched, || run_callbacks(zombies));
        sched.reaping = false;
        shared.reap_done.notify_all();
    }

    let remaining: Vec<ReapCallback> = sched
        .entries
        .drain()
        .map(|(_, entry)| entry.callback)
        .collect();
    sched.order.clear();

    if shared.policy == DestroyPolicy::CallbackOnDestroy && !remaining.is_empty() {
        debug!("Reaper: invoking {} callback(s) on destroy", remaining.len());
        sched.reaping = true;
        MutexGuard::unlocked(&mut sched, || run_callbacks(remaining));
        sched.reaping = false;
    } else {
        drop(remaining);
    }
    shared.reap_done.notify_all();
}
