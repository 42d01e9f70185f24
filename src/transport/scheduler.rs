//! Timeout scheduler.
//!
//! Runs delayed tasks on the factory's executor. Every pending task is
//! tracked so that stopping the scheduler aborts them all.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

// ============================================================================
// Scheduler
// ============================================================================

/// Delayed-task scheduler bound to one executor.
pub struct Scheduler {
    /// Executor the timers run on.
    handle: Handle,
    /// Pending tasks by ID.
    tasks: Mutex<FxHashMap<u64, AbortHandle>>,
    /// Next task ID.
    next_id: AtomicU64,
    /// Set once stopped; new tasks are refused.
    stopped: AtomicBool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending_count())
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish()
    }
}

/// Handle to a scheduled task.
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    scheduler: Weak<Scheduler>,
}

impl ScheduledTask {
    /// Cancels the task if it has not run yet.
    ///
    /// Returns `true` if the task was still pending.
    pub fn cancel(&self) -> bool {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return false;
        };
        let removed = scheduler.tasks.lock().remove(&self.id);
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Scheduler {
    /// Creates a scheduler running tasks on `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tasks: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    /// Runs `task` after `delay`.
    ///
    /// Returns `None` once the scheduler is stopped.
    pub fn schedule<F>(self: &Arc<Self>, delay: Duration, task: F) -> Option<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(self);

        // Lock across spawn so a zero-delay task cannot deregister before it
        // is registered
        let mut tasks = self.tasks.lock();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = weak
                .upgrade()
                .is_some_and(|scheduler| scheduler.tasks.lock().remove(&id).is_some());
            if still_pending {
                task();
            }
        });
        tasks.insert(id, join.abort_handle());

        Some(ScheduledTask {
            id,
            scheduler: Arc::downgrade(self),
        })
    }

    /// Returns the number of pending tasks.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Aborts every pending task and refuses new ones.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        let count = tasks.len();
        for (_, handle) in tasks {
            handle.abort();
        }
        debug!(aborted = count, "Scheduler stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
