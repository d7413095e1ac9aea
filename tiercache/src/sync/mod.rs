//! Blocking synchronization primitives used by the disk cache.
//!
//! Both locks are monitors built on `parking_lot::Mutex` + `Condvar`:
//!
//! - [`ReadWriteLock`]: shared/exclusive lock with writer preference
//! - [`ConditionLock`]: exclusive lock whose acquisition can be gated on a
//!   bit field condition, similar to a condition lock that accepts a mask
//!   of acceptable conditions instead of a single value
//!
//! Each lock can protect data (`ReadWriteLock<T>`, `ConditionLock<T>`) and
//! hands out RAII guards. The unit-typed variants additionally expose a raw
//! lock/unlock API for callers whose acquire and release happen in different
//! scopes.

mod condition_lock;
mod rw_lock;

pub use condition_lock::{ConditionGuard, ConditionLock};
pub use rw_lock::{ReadGuard, ReadWriteLock, WriteGuard};
