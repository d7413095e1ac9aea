//! Shared/exclusive lock with writer preference.

use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Bookkeeping for the lock, protected by the internal mutex.
#[derive(Debug, Default)]
struct LockState {
    /// Number of threads currently holding the lock for reading.
    readers: usize,
    /// Whether a writer currently holds the lock.
    writer: bool,
    /// Writers blocked in `acquire_write`.
    waiting_writers: usize,
}

/// A non-reentrant read-write lock.
///
/// Any number of readers may hold the lock at once, provided no writer
/// holds it or is waiting for it. A writer excludes all readers and all
/// other writers.
///
/// # Fairness
///
/// The lock prefers writers: once a writer starts waiting, new readers
/// block until that writer has acquired and released the lock. Readers
/// released by a writer are woken together. A steady stream of writers can
/// therefore delay readers, but with a bounded number of writers every
/// reader eventually proceeds.
///
/// # Reentrancy
///
/// Acquiring the lock again on a thread that already holds it deadlocks
/// (write) or may deadlock behind a waiting writer (read).
pub struct ReadWriteLock<T = ()> {
    state: Mutex<LockState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is mediated by `state`; shared references are
// only handed out to readers while no writer exists, and the mutable
// reference only to the single writer.
unsafe impl<T: Send> Send for ReadWriteLock<T> {}
unsafe impl<T: Send + Sync> Sync for ReadWriteLock<T> {}

impl<T> ReadWriteLock<T> {
    /// Create a new unlocked lock protecting `data`.
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Lock for shared access, blocking while a writer holds or awaits the lock.
    pub fn read(&self) -> ReadGuard<'_, T> {
        self.acquire_read();
        ReadGuard { lock: self }
    }

    /// Lock for exclusive access, blocking until all holders have released.
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.acquire_write();
        WriteGuard { lock: self }
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the lock and return the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn acquire_read(&self) {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.readers_cv.wait(&mut state);
        }
        state.readers += 1;
    }

    fn acquire_write(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.writers_cv.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    /// Release whichever kind of lock is held.
    ///
    /// A writer excludes readers, so if the writer flag is set the caller
    /// must be that writer.
    fn release(&self) {
        let mut state = self.state.lock();
        if state.writer {
            state.writer = false;
        } else {
            assert!(
                state.readers > 0,
                "ReadWriteLock::unlock called without holding the lock"
            );
            state.readers -= 1;
        }

        if state.waiting_writers > 0 {
            if state.readers == 0 {
                self.writers_cv.notify_one();
            }
        } else {
            self.readers_cv.notify_all();
        }
    }
}

impl ReadWriteLock<()> {
    /// Acquire the lock for reading without a guard.
    ///
    /// Must be paired with exactly one [`unlock`](Self::unlock).
    pub fn lock_for_reading(&self) {
        self.acquire_read();
    }

    /// Acquire the lock for writing without a guard.
    ///
    /// Must be paired with exactly one [`unlock`](Self::unlock).
    pub fn lock_for_writing(&self) {
        self.acquire_write();
    }

    /// Release the read or write lock held by the caller.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not held at all. Releasing a lock held by a
    /// different thread is not detected and breaks mutual exclusion.
    pub fn unlock(&self) {
        self.release();
    }
}

impl<T: Default> Default for ReadWriteLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for ReadWriteLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReadWriteLock")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

/// Shared access to the data of a [`ReadWriteLock`]; unlocks on drop.
pub struct ReadGuard<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a read guard exists only while no writer holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Exclusive access to the data of a [`ReadWriteLock`]; unlocks on drop.
pub struct WriteGuard<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write guard is the only holder of the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write guard is the only holder of the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
