//! Core types for the cache system: errors and configuration.

use crate::cache::codec::CodecError;
use crate::queue::Priority;
use std::path::PathBuf;
use thiserror::Error;

/// Default disk cache size limit (512 MiB).
pub const DEFAULT_DISK_SIZE_LIMIT: u64 = 512 * 1024 * 1024;

/// Default memory cache cost limit (64 MiB for byte-costed values).
pub const DEFAULT_MEMORY_MAX_COST: usize = 64 * 1024 * 1024;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error while reading, writing or deleting cache files
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted index could not be encoded or decoded
    #[error("Cache index error: {0}")]
    Index(#[from] serde_json::Error),

    /// The cache has been destroyed (or is being destroyed)
    #[error("Cache has been destroyed")]
    Destroyed,

    /// A codec failed to convert between a value and its bytes
    #[error("Cache codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Disk cache configuration.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Root directory of the store
    pub store_dir: PathBuf,
    /// Size budget in bytes; exceeded only while entries are pinned
    pub size_limit: u64,
    /// Tier on which eviction passes run
    pub eviction_priority: Priority,
}

impl DiskCacheConfig {
    /// Configuration for a store rooted at `store_dir` with default limits.
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            ..Self::default()
        }
    }

    /// Set the size limit in bytes.
    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Set the priority tier for background eviction.
    pub fn with_eviction_priority(mut self, priority: Priority) -> Self {
        self.eviction_priority = priority;
        self
    }

    /// Reject configurations the cache cannot honour.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.size_limit == 0 {
            return Err(CacheError::InvalidConfig(
                "size_limit must be greater than zero".to_string(),
            ));
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "store_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let store_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tiercache");

        Self {
            store_dir,
            size_limit: DEFAULT_DISK_SIZE_LIMIT,
            eviction_priority: Priority::Background,
        }
    }
}

/// Memory cache configuration.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Total cost the memory tier may hold before evicting
    pub max_cost: usize,
}

impl MemoryCacheConfig {
    /// Set the maximum total cost.
    pub fn with_max_cost(mut self, max_cost: usize) -> Self {
        self.max_cost = max_cost;
        self
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_cost: DEFAULT_MEMORY_MAX_COST,
        }
    }
}
