//! Two-tier cache: a persistent size-bounded disk store with an in-memory
//! tier on top.
//!
//! Provides pinned file access, LRU eviction on both tiers, index
//! persistence with crash recovery, and statistics tracking.

mod codec;
mod daemon;
mod disk;
mod index;
mod memory;
mod stats;
mod two_level;
mod types;

pub use codec::{BytesCodec, Codec, CodecError, DecodeOnly, JsonCodec};
pub use daemon::SyncDaemon;
pub use disk::{Access, DiskCache};
pub use memory::MemoryCache;
pub use stats::CacheStats;
pub use two_level::{TwoLevelCache, DEFAULT_WRITE_CONCURRENCY};
pub use types::{
    CacheError, DiskCacheConfig, MemoryCacheConfig, DEFAULT_DISK_SIZE_LIMIT,
    DEFAULT_MEMORY_MAX_COST,
};
