//! TierCache - persistent, size-bounded caching with pinned file access
//!
//! The core is [`DiskCache`], a filesystem-backed key → bytes store that
//! enforces a total size budget by least-recently-used eviction while letting
//! callers read files by path without racing that eviction. [`TwoLevelCache`]
//! layers a bounded in-memory tier and a [`Codec`] on top of it.
//!
//! The concurrency primitives the cache is built from are public too:
//! [`ReadWriteLock`], [`ConditionLock`], [`UseTracker`] and
//! [`ConcurrentQueue`].
//!
//! ```no_run
//! use tiercache::{DiskCache, MemoryCache, TwoLevelCache};
//! use std::sync::Arc;
//!
//! let disk = DiskCache::new("/var/cache/thumbnails", 256 * 1024 * 1024)?;
//! let cache = TwoLevelCache::raw(Arc::new(MemoryCache::new(16 * 1024 * 1024)), disk.clone());
//!
//! cache.set_object("cover", vec![0u8; 1024]);
//! assert!(cache.object_for_key("cover")?.is_some());
//!
//! // Read a file in place; it cannot be evicted until `access` is dropped.
//! if let Some(access) = disk.start_access_for_key("cover")? {
//!     println!("{}", access.path().display());
//! }
//!
//! cache.wait_for_pending_writes();
//! disk.sync()?;
//! # Ok::<(), tiercache::CacheError>(())
//! ```

pub mod cache;
pub mod queue;
pub mod sync;
pub mod tracker;

pub use cache::{
    Access, BytesCodec, CacheError, CacheStats, Codec, CodecError, DecodeOnly, DiskCache,
    DiskCacheConfig, JsonCodec, MemoryCache, MemoryCacheConfig, SyncDaemon, TwoLevelCache,
};
pub use queue::{ConcurrentQueue, Priority};
pub use sync::{ConditionLock, ReadWriteLock};
pub use tracker::UseTracker;

/// Version of the tiercache library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
