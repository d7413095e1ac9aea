//! Bounded-parallelism work queue.
//!
//! [`ConcurrentQueue`] accepts units of work without blocking the caller and
//! runs at most `concurrent_operation_limit` of them at a time on the shared
//! pool of its [`Priority`] tier. Units beyond the limit wait in submission
//! order for a free slot.
//!
//! # Example
//!
//! ```
//! use tiercache::{ConcurrentQueue, Priority};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let queue = ConcurrentQueue::new(2, Priority::Background);
//! let done = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..5 {
//!     let done = Arc::clone(&done);
//!     queue.enqueue(move || {
//!         done.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! queue.wait_until_idle();
//! assert_eq!(done.load(Ordering::SeqCst), 5);
//! ```

mod priority;

pub use priority::{Priority, FALLBACK_CPU_COUNT, MIN_POOL_THREADS};

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

type Work = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    /// Units currently executing (occupied slots).
    running: usize,
    /// Units waiting for a slot, oldest first.
    pending: VecDeque<Work>,
}

struct Shared {
    limit: usize,
    priority: Priority,
    state: Mutex<QueueState>,
    idle: Condvar,
}

/// Executor that caps how many submitted units run simultaneously.
///
/// Cloning yields another handle to the same queue. There is no
/// cancellation: every submitted unit eventually runs. A unit that panics is
/// contained and logged; its slot is released either way.
#[derive(Clone)]
pub struct ConcurrentQueue {
    shared: Arc<Shared>,
}

impl ConcurrentQueue {
    /// Create a queue running at most `concurrent_operation_limit` units at once.
    ///
    /// # Panics
    ///
    /// Panics if `concurrent_operation_limit` is zero.
    pub fn new(concurrent_operation_limit: usize, priority: Priority) -> Self {
        assert!(
            concurrent_operation_limit > 0,
            "concurrent_operation_limit must be > 0"
        );
        Self {
            shared: Arc::new(Shared {
                limit: concurrent_operation_limit,
                priority,
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Maximum number of units running at once.
    pub fn concurrent_operation_limit(&self) -> usize {
        self.shared.limit
    }

    /// Tier whose pool executes this queue's work.
    pub fn priority(&self) -> Priority {
        self.shared.priority
    }

    /// Submit a unit of work. Never blocks.
    pub fn enqueue<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let work: Work = Box::new(work);
        let mut state = self.shared.state.lock();
        if state.running < self.shared.limit {
            state.running += 1;
            drop(state);
            Self::dispatch(Arc::clone(&self.shared), work);
        } else {
            state.pending.push_back(work);
        }
    }

    /// Units currently executing.
    pub fn running(&self) -> usize {
        self.shared.state.lock().running
    }

    /// Units waiting for a slot.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Block until no unit is running or waiting.
    ///
    /// Work submitted while waiting extends the wait. Calling this from a
    /// unit running on the same queue deadlocks.
    pub fn wait_until_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.running > 0 || !state.pending.is_empty() {
            self.shared.idle.wait(&mut state);
        }
    }

    fn dispatch(shared: Arc<Shared>, work: Work) {
        let priority = shared.priority;
        priority.spawn(move || {
            if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                warn!(tier = %priority, "Queued unit of work panicked");
            }
            Self::complete(shared);
        });
    }

    /// Hand the freed slot to the oldest waiting unit, or release it.
    fn complete(shared: Arc<Shared>) {
        let mut state = shared.state.lock();
        match state.pending.pop_front() {
            Some(next) => {
                drop(state);
                Self::dispatch(shared, next);
            }
            None => {
                state.running -= 1;
                if state.running == 0 {
                    shared.idle.notify_all();
                }
            }
        }
    }
}

impl fmt::Debug for ConcurrentQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConcurrentQueue")
            .field("limit", &self.shared.limit)
            .field("priority", &self.shared.priority)
            .field("running", &state.running)
            .field("pending", &state.pending.len())
            .finish()
    }
}
