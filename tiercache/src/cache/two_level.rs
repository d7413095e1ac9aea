//! Memory tier in front of a disk tier.

use crate::cache::codec::{BytesCodec, Codec};
use crate::cache::disk::DiskCache;
use crate::cache::memory::MemoryCache;
use crate::cache::stats::CacheStats;
use crate::cache::types::CacheError;
use crate::queue::{ConcurrentQueue, Priority};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of disk writes running at once.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 2;

/// Two-tier cache of decoded values.
///
/// Reads check the [`MemoryCache`] first and fall back to the [`DiskCache`],
/// decoding with the [`Codec`] and promoting the result into memory. Writes
/// land in memory immediately and reach disk asynchronously through a
/// [`ConcurrentQueue`], provided the codec can encode.
///
/// Eviction is left entirely to the two tiers.
pub struct TwoLevelCache<V> {
    memory: Arc<MemoryCache<V>>,
    disk: DiskCache,
    codec: Arc<dyn Codec<V>>,
    writes: ConcurrentQueue,
}

impl<V> TwoLevelCache<V>
where
    V: Send + Sync + 'static,
{
    /// Compose a memory tier, a disk tier and a codec.
    pub fn new(
        memory: Arc<MemoryCache<V>>,
        disk: DiskCache,
        codec: impl Codec<V> + 'static,
    ) -> Self {
        Self {
            memory,
            disk,
            codec: Arc::new(codec),
            writes: ConcurrentQueue::new(DEFAULT_WRITE_CONCURRENCY, Priority::Background),
        }
    }

    /// Use `queue` for asynchronous disk writes.
    pub fn with_write_queue(mut self, queue: ConcurrentQueue) -> Self {
        self.writes = queue;
        self
    }

    /// Look up `key` in memory, then on disk.
    ///
    /// A disk hit is decoded and cached in memory. Returns `Ok(None)` if
    /// neither tier has the key; a value that fails to decode is an error.
    pub fn object_for_key(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
        if let Some(value) = self.memory.get(key) {
            return Ok(Some(value));
        }

        let Some(bytes) = self.disk.data_for_key(key)? else {
            return Ok(None);
        };

        let value = Arc::new(self.codec.decode(bytes)?);
        self.memory
            .insert(key, Arc::clone(&value), self.codec.cost(&value));
        debug!(key, "Promoted disk cache hit to memory");
        Ok(Some(value))
    }

    /// Cache `value` under `key`.
    ///
    /// The memory tier is updated before this returns. If the codec supports
    /// encoding, the value is then encoded and written to disk in the
    /// background; failures there are logged, not returned. Two writes of
    /// the same key may reach disk in either order.
    pub fn set_object(&self, key: &str, value: impl Into<Arc<V>>) {
        let value = value.into();
        self.memory
            .insert(key, Arc::clone(&value), self.codec.cost(&value));

        if !self.codec.supports_encoding() {
            return;
        }

        let disk = self.disk.clone();
        let codec = Arc::clone(&self.codec);
        let key = key.to_string();
        self.writes.enqueue(move || {
            let result = codec
                .encode(&value)
                .map_err(CacheError::from)
                .and_then(|bytes| disk.set_data(&key, &bytes));

            match result {
                Ok(()) => {}
                Err(CacheError::Destroyed) => {
                    debug!(key = %key, "Disk cache destroyed, dropping write")
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to write object to disk cache"),
            }
        });
    }

    /// Block until every queued disk write has finished.
    pub fn wait_for_pending_writes(&self) {
        self.writes.wait_until_idle();
    }
}

impl<V> TwoLevelCache<V> {
    pub fn memory_cache(&self) -> &Arc<MemoryCache<V>> {
        &self.memory
    }

    pub fn disk_cache(&self) -> &DiskCache {
        &self.disk
    }

    pub fn codec(&self) -> &dyn Codec<V> {
        self.codec.as_ref()
    }

    /// Memory counters from the memory tier combined with disk counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats::merge(&self.memory.stats(), &self.disk.stats())
    }
}

impl TwoLevelCache<Vec<u8>> {
    /// Byte-buffer cache: values are stored on disk as-is.
    pub fn raw(memory: Arc<MemoryCache<Vec<u8>>>, disk: DiskCache) -> Self {
        Self::new(memory, disk, BytesCodec)
    }
}

impl<V> fmt::Debug for TwoLevelCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoLevelCache")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .field("writes", &self.writes)
            .finish()
    }
}
