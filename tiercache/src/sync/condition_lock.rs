//! Mutex gated on a bit field condition.
//!
//! Argument rules, enforced with assertions:
//! - `condition` arguments: exactly one bit must be set
//! - `conditions` arguments: one or more bits must be set (non-zero)

use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Every condition bit; used by [`ConditionLock::lock`].
const ANY_CONDITION: u64 = u64::MAX;

#[derive(Debug)]
struct ConditionState {
    condition: u64,
    held: bool,
}

/// An exclusive lock carrying a single-bit condition value.
///
/// [`lock_on_conditions`](Self::lock_on_conditions) blocks until the lock is
/// free *and* the current condition intersects the requested mask. Releasing
/// through [`ConditionGuard::unlock_with_condition`] stores a new condition
/// and wakes every waiter, each of which re-checks its own mask.
///
/// Between acquisition and release the holder has exclusive access to the
/// protected data and is the only party that can change the condition.
pub struct ConditionLock<T = ()> {
    state: Mutex<ConditionState>,
    changed: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only reachable through a guard, and at most one guard
// exists at a time (`held`).
unsafe impl<T: Send> Send for ConditionLock<T> {}
unsafe impl<T: Send> Sync for ConditionLock<T> {}

fn assert_single_bit(condition: u64) {
    assert!(
        condition.count_ones() == 1,
        "condition must have exactly one bit set, got {condition:#b}"
    );
}

fn assert_any_bit(conditions: u64) {
    assert!(conditions != 0, "conditions mask must not be zero");
}

impl<T> ConditionLock<T> {
    /// Create an unlocked lock with the given initial condition.
    ///
    /// # Panics
    ///
    /// Panics unless `condition` has exactly one bit set.
    pub fn new(condition: u64, data: T) -> Self {
        assert_single_bit(condition);
        Self {
            state: Mutex::new(ConditionState {
                condition,
                held: false,
            }),
            changed: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// The current condition value.
    pub fn condition(&self) -> u64 {
        self.state.lock().condition
    }

    /// Acquire the lock whatever the current condition.
    pub fn lock(&self) -> ConditionGuard<'_, T> {
        self.acquire(ANY_CONDITION);
        ConditionGuard {
            lock: self,
            _data: PhantomData,
        }
    }

    /// Acquire the lock once the condition intersects `conditions`.
    ///
    /// Blocks without a timeout.
    ///
    /// # Panics
    ///
    /// Panics if `conditions` is zero.
    pub fn lock_on_conditions(&self, conditions: u64) -> ConditionGuard<'_, T> {
        assert_any_bit(conditions);
        self.acquire(conditions);
        ConditionGuard {
            lock: self,
            _data: PhantomData,
        }
    }

    fn acquire(&self, conditions: u64) {
        let mut state = self.state.lock();
        while state.held || state.condition & conditions == 0 {
            self.changed.wait(&mut state);
        }
        state.held = true;
    }

    fn release(&self, condition: Option<u64>) {
        let mut state = self.state.lock();
        assert!(state.held, "ConditionLock released while not locked");
        if let Some(condition) = condition {
            state.condition = condition;
        }
        state.held = false;
        drop(state);
        self.changed.notify_all();
    }
}

impl ConditionLock<()> {
    /// Guard-less [`lock_on_conditions`](Self::lock_on_conditions).
    ///
    /// Must be paired with [`raw_unlock_with_condition`](Self::raw_unlock_with_condition)
    /// or [`raw_unlock`](Self::raw_unlock), possibly from another thread.
    pub fn raw_lock_on_conditions(&self, conditions: u64) {
        assert_any_bit(conditions);
        self.acquire(conditions);
    }

    /// Set the condition, release the lock and wake waiters.
    ///
    /// # Panics
    ///
    /// Panics unless `condition` has exactly one bit set, or if the lock is
    /// not held.
    pub fn raw_unlock_with_condition(&self, condition: u64) {
        assert_single_bit(condition);
        self.release(Some(condition));
    }

    /// Release the lock leaving the condition unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not held.
    pub fn raw_unlock(&self) {
        self.release(None);
    }
}

impl<T> fmt::Debug for ConditionLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConditionLock")
            .field("condition", &format_args!("{:#b}", state.condition))
            .field("held", &state.held)
            .finish()
    }
}

/// Exclusive access obtained from a [`ConditionLock`].
///
/// Dropping the guard releases the lock with the condition unchanged.
///
/// The guard is `Sync` only when `T` is, since a shared guard hands out `&T`:
///
/// ```compile_fail
/// use std::cell::Cell;
/// use tiercache::ConditionLock;
///
/// fn assert_sync<S: Sync>(_: &S) {}
///
/// let lock = ConditionLock::new(1, Cell::new(0u64));
/// let guard = lock.lock();
/// assert_sync(&guard);
/// ```
pub struct ConditionGuard<'a, T> {
    lock: &'a ConditionLock<T>,
    _data: PhantomData<&'a mut T>,
}

impl<'a, T> ConditionGuard<'a, T> {
    /// The condition value at the time of the call; stable while held.
    pub fn condition(&self) -> u64 {
        self.lock.condition()
    }

    /// Store `condition`, release the lock, and wake all waiters.
    ///
    /// # Panics
    ///
    /// Panics unless `condition` has exactly one bit set.
    pub fn unlock_with_condition(self, condition: u64) {
        assert_single_bit(condition);
        let lock = self.lock;
        std::mem::forget(self);
        lock.release(Some(condition));
    }
}

impl<T> Deref for ConditionGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is the unique holder of the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for ConditionGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard is the unique holder of the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for ConditionGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release(None);
    }
}
