//! Persistent, size-bounded blob store with pinned access.
//!
//! Index bookkeeping happens under a [`ReadWriteLock`]; file I/O never does.
//! A file is protected from deletion while it is being read by a pin on its
//! entry, which eviction, replacement and removal all respect.
//!
//! Every operation is counted as in flight on a [`ConditionLock`] whose
//! condition tracks the cache lifecycle:
//!
//! ```text
//! IDLE <-> BUSY            operations come and go
//! IDLE|BUSY -> DRAINING    destroy() called, waiting for operations to end
//! DRAINING -> DRAINED      last operation ended
//! DRAINED -> DESTROYED     files deleted; terminal
//! ```

use crate::cache::index::{self, remove_if_exists, Index, BLOB_DIR, INDEX_FILE, INDEX_TEMP_FILE};
use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheError, DiskCacheConfig};
use crate::queue::ConcurrentQueue;
use crate::sync::{ConditionLock, ReadWriteLock};
use parking_lot::Mutex;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const IDLE: u64 = 1 << 0;
const BUSY: u64 = 1 << 1;
const DRAINING: u64 = 1 << 2;
const DRAINED: u64 = 1 << 3;
const DESTROYED: u64 = 1 << 4;

struct Inner {
    store_dir: PathBuf,
    blob_dir: PathBuf,
    size_limit: u64,
    /// Condition is the lifecycle phase, data the number of operations in flight.
    lifecycle: ConditionLock<usize>,
    index: ReadWriteLock<Index>,
    /// Index generation last written by `sync`. Held for writing while persisting.
    synced_generation: ReadWriteLock<u64>,
    eviction_queue: ConcurrentQueue,
    eviction_scheduled: AtomicBool,
    stats: Mutex<CacheStats>,
}

/// Ends an in-flight operation when dropped.
struct Operation<'a> {
    inner: &'a Inner,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.inner.end_operation();
    }
}

impl Inner {
    fn begin_operation(&self) -> Result<(), CacheError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.condition() {
            IDLE | BUSY => {
                *lifecycle += 1;
                lifecycle.unlock_with_condition(BUSY);
                Ok(())
            }
            _ => Err(CacheError::Destroyed),
        }
    }

    fn end_operation(&self) {
        let mut lifecycle = self.lifecycle.lock();
        debug_assert!(*lifecycle > 0, "operation ended twice");
        *lifecycle -= 1;
        if *lifecycle > 0 {
            return;
        }
        match lifecycle.condition() {
            BUSY => lifecycle.unlock_with_condition(IDLE),
            DRAINING => lifecycle.unlock_with_condition(DRAINED),
            _ => {}
        }
    }

    fn operation(&self) -> Result<Operation<'_>, CacheError> {
        self.begin_operation()?;
        Ok(Operation { inner: self })
    }

    fn is_destroyed(&self) -> bool {
        self.lifecycle.condition() & (DRAINING | DRAINED | DESTROYED) != 0
    }

    fn over_limit(&self) -> bool {
        self.index.read().total_size() > self.size_limit
    }

    /// Publish occupancy; called with the index lock held.
    fn refresh_size(&self, index: &Index) {
        self.stats
            .lock()
            .update_disk_size(index.total_size(), index.len());
    }

    fn release_pin(&self, key: &str, path: &Path) {
        let retired = self.index.write().unpin(key, path);
        if let Some(file) = retired {
            delete_file(key, &file);
        }
    }

    /// Queue one eviction pass unless one is already waiting to run.
    fn schedule_eviction(self: &Arc<Self>) {
        if self.eviction_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        self.eviction_queue.enqueue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.eviction_scheduled.store(false, Ordering::Release);
            match inner.evict() {
                Ok(_) | Err(CacheError::Destroyed) => {}
                Err(e) => warn!(error = %e, "Background disk cache eviction failed"),
            }
        });
    }

    fn evict(&self) -> Result<u64, CacheError> {
        let _op = self.operation()?;

        let (pass, size_after, entries_after) = {
            let mut index = self.index.write();
            let pass = index.take_eviction_victims(self.size_limit);
            self.refresh_size(&index);
            (pass, index.total_size(), index.len())
        };
        if pass.evicted.is_empty() && pass.pinned_skipped == 0 {
            return Ok(0);
        }

        for (key, file, _) in &pass.evicted {
            delete_file(key, file);
        }

        let freed = pass.freed_bytes();
        self.stats.lock().record_disk_eviction(
            pass.evicted.len() as u64,
            freed,
            pass.pinned_skipped,
        );

        if pass.evicted.is_empty() {
            debug!(
                pinned_skipped = pass.pinned_skipped,
                size_kb = size_after / 1_000,
                "Disk cache over limit but every candidate is pinned"
            );
        } else {
            info!(
                evicted = pass.evicted.len(),
                freed_kb = freed / 1_000,
                pinned_skipped = pass.pinned_skipped,
                entries = entries_after,
                size_kb = size_after / 1_000,
                limit_kb = self.size_limit / 1_000,
                "Disk cache eviction"
            );
        }
        Ok(freed)
    }

    /// Delete every file of the store. Runs once, after draining.
    fn remove_store(&self) -> Result<(), CacheError> {
        let files = {
            let mut index = self.index.write();
            let files = index.drain();
            self.refresh_size(&index);
            files
        };

        let mut first_error = None;
        for file in &files {
            if let Err(e) = remove_if_exists(file) {
                warn!(path = %file.display(), error = %e, "Failed to delete cache file");
                first_error.get_or_insert(e);
            }
        }
        for name in [INDEX_FILE, INDEX_TEMP_FILE] {
            if let Err(e) = remove_if_exists(&self.store_dir.join(name)) {
                warn!(file = name, error = %e, "Failed to delete index file");
                first_error.get_or_insert(e);
            }
        }
        match fs::remove_dir_all(&self.blob_dir) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(path = %self.blob_dir.display(), error = %e, "Failed to remove blob directory");
                first_error.get_or_insert(e);
            }
            _ => {}
        }

        debug!(files = files.len(), "Disk cache files removed");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for Inner {
    /// Persist unsynced index changes when the last handle goes away.
    fn drop(&mut self) {
        if self.is_destroyed() {
            return;
        }
        let state = self.index.get_mut();
        if state.generation() == *self.synced_generation.get_mut() {
            return;
        }
        if let Err(e) = index::persist(&self.store_dir, &state.snapshot()) {
            warn!(store = %self.store_dir.display(), error = %e, "Failed to sync disk cache on drop");
        }
    }
}

fn delete_file(key: &str, path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(key, path = %path.display(), error = %e, "Failed to delete cache file");
    }
}

/// Persistent key → bytes store bounded by a total size limit.
///
/// Cloning yields another handle to the same store. Entries are evicted in
/// least-recently-used order once the total size exceeds the limit, skipping
/// entries that are pinned by an open [`Access`] or an in-progress read. The
/// limit is therefore soft: while every candidate is pinned the store stays
/// over budget, and the next write, sync or released pin retries eviction.
///
/// The index is persisted by [`sync`](Self::sync), by [`SyncDaemon`](crate::cache::SyncDaemon)
/// if one is running, and when the last handle is dropped. Entries written
/// after the last persisted index are discarded on the next open.
///
/// A store directory must be opened by at most one `DiskCache` at a time.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<Inner>,
}

impl DiskCache {
    /// Open (or create) the store at `store_dir` with the given size limit in bytes.
    pub fn new(store_dir: impl Into<PathBuf>, size_limit: u64) -> Result<Self, CacheError> {
        Self::with_config(DiskCacheConfig::new(store_dir).with_size_limit(size_limit))
    }

    /// Open (or create) a store from a configuration.
    ///
    /// Recovers the persisted index, discarding entries whose files are gone
    /// and deleting files no entry refers to, then evicts if the recovered
    /// store is over its limit.
    pub fn with_config(config: DiskCacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let (index, recovery) = index::load(&config.store_dir)?;
        let over_limit = index.total_size() > config.size_limit;

        let mut stats = CacheStats::new();
        stats.update_disk_size(index.total_size(), index.len());

        info!(
            store = %config.store_dir.display(),
            entries = recovery.entries_loaded,
            dropped = recovery.entries_dropped,
            orphans_removed = recovery.orphans_removed,
            size_kb = recovery.total_bytes / 1_000,
            limit_kb = config.size_limit / 1_000,
            "Disk cache opened"
        );

        let cache = Self {
            inner: Arc::new(Inner {
                blob_dir: config.store_dir.join(BLOB_DIR),
                store_dir: config.store_dir,
                size_limit: config.size_limit,
                lifecycle: ConditionLock::new(IDLE, 0),
                index: ReadWriteLock::new(index),
                synced_generation: ReadWriteLock::new(0),
                eviction_queue: ConcurrentQueue::new(1, config.eviction_priority),
                eviction_scheduled: AtomicBool::new(false),
                stats: Mutex::new(stats),
            }),
        };

        if over_limit {
            cache.evict_if_over_limit()?;
        }
        Ok(cache)
    }

    /// Root directory of the store.
    pub fn store_dir(&self) -> &Path {
        &self.inner.store_dir
    }

    /// Size budget in bytes.
    pub fn size_limit(&self) -> u64 {
        self.inner.size_limit
    }

    /// Sum of the sizes of all indexed entries.
    pub fn total_size(&self) -> u64 {
        self.inner.index.read().total_size()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.index.read().len()
    }

    /// Pins currently held, by open accesses and in-progress reads.
    ///
    /// [`destroy`](Self::destroy) waits for this to reach zero.
    pub fn pinned_count(&self) -> usize {
        self.inner.index.read().pinned()
    }

    /// Snapshot of the disk tier counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.lock().clone()
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Whether `key` is indexed. Always `false` once destroyed.
    pub fn contains_data_for_key(&self, key: &str) -> bool {
        match self.inner.operation() {
            Ok(_op) => self.inner.index.read().contains(key),
            Err(_) => false,
        }
    }

    /// Read the bytes stored under `key`.
    ///
    /// The entry is pinned for the duration of the read, so a concurrent
    /// eviction cannot delete the file mid-read. No lock is held during I/O.
    /// An entry whose file has vanished is dropped from the index and
    /// reported as absent.
    pub fn data_for_key(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let inner = &*self.inner;
        let _op = inner.operation()?;

        let pinned = inner.index.write().pin(key);
        let Some(path) = pinned else {
            inner.stats.lock().record_disk_miss();
            return Ok(None);
        };

        let read = fs::read(&path);
        let file_missing = matches!(&read, Err(e) if e.kind() == ErrorKind::NotFound);

        let retired = {
            let mut index = inner.index.write();
            let retired = index.unpin(key, &path);
            if file_missing && index.get(key).is_some_and(|entry| entry.path == path) {
                index.remove(key);
                inner.refresh_size(&index);
            }
            retired
        };
        if let Some(file) = retired {
            delete_file(key, &file);
        }

        match read {
            Ok(data) => {
                inner.stats.lock().record_disk_hit();
                Ok(Some(data))
            }
            Err(_) if file_missing => {
                warn!(key, path = %path.display(), "Cache file missing, dropping entry");
                inner.stats.lock().record_disk_miss();
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store `data` under `key`, replacing any previous value.
    ///
    /// The bytes go to a fresh file and the index is only updated once the
    /// write has succeeded, so a failed write leaves the previous value in
    /// place. Concurrent writes to the same key resolve last-writer-wins.
    /// Triggers a background eviction pass if the store is over its limit.
    pub fn set_data(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        let inner = &self.inner;
        let _op = inner.operation()?;

        let path = inner.index.write().allocate_path();
        if let Err(e) = fs::write(&path, data) {
            inner.stats.lock().record_disk_write_failure();
            if let Err(cleanup) = remove_if_exists(&path) {
                warn!(key, path = %path.display(), error = %cleanup, "Failed to clean up partial write");
            }
            return Err(e.into());
        }

        let (replaced, over_limit) = {
            let mut index = inner.index.write();
            let replaced = index.commit(key, path, data.len() as u64);
            inner.refresh_size(&index);
            (replaced, index.total_size() > inner.size_limit)
        };
        inner.stats.lock().record_disk_write();

        if let Some(file) = replaced {
            delete_file(key, &file);
        }
        if over_limit {
            inner.schedule_eviction();
        }
        Ok(())
    }

    /// Pin `key` and return an [`Access`] to its file.
    ///
    /// The file stays on disk, unmodified, until the access is finished or
    /// dropped, even if the key is meanwhile overwritten, removed or evicted.
    /// Returns `Ok(None)` without pinning anything if the key is absent.
    ///
    /// An open access also holds off [`destroy`](Self::destroy).
    pub fn start_access_for_key(&self, key: &str) -> Result<Option<Access>, CacheError> {
        self.inner.begin_operation()?;

        let pinned = self.inner.index.write().pin(key);
        match pinned {
            Some(path) => Ok(Some(Access {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                path,
            })),
            None => {
                self.inner.end_operation();
                Ok(None)
            }
        }
    }

    /// Release the pin held by `access`. May be called from any thread.
    pub fn finish_access(&self, access: Access) {
        access.finish();
    }

    /// Remove `key` and its file. Returns whether the key was present.
    ///
    /// A pinned file is deleted once its last access finishes.
    pub fn remove_data_for_key(&self, key: &str) -> Result<bool, CacheError> {
        let inner = &*self.inner;
        let _op = inner.operation()?;

        let (existed, file) = {
            let mut index = inner.index.write();
            let existed = index.contains(key);
            let file = index.remove(key);
            inner.refresh_size(&index);
            (existed, file)
        };
        if let Some(file) = file {
            remove_if_exists(&file)?;
        }
        Ok(existed)
    }

    /// Run an eviction pass now. Returns the number of bytes freed.
    pub fn evict_if_over_limit(&self) -> Result<u64, CacheError> {
        self.inner.evict()
    }

    /// Block until any scheduled background eviction has finished.
    pub fn wait_for_eviction(&self) {
        self.inner.eviction_queue.wait_until_idle();
    }

    /// Persist the index.
    ///
    /// Readers and writers proceed while the snapshot is written; concurrent
    /// syncs are serialized. Does nothing if the index is unchanged since the
    /// last sync. Also schedules eviction if the store is over its limit,
    /// which lets a store that was held over budget by pins converge.
    pub fn sync(&self) -> Result<(), CacheError> {
        let inner = &self.inner;
        let _op = inner.operation()?;

        let mut synced = inner.synced_generation.write();
        let pending = {
            let index = inner.index.read();
            (index.generation() != *synced).then(|| (index.snapshot(), index.generation()))
        };
        if let Some((snapshot, generation)) = pending {
            index::persist(&inner.store_dir, &snapshot)?;
            *synced = generation;
            inner.stats.lock().record_sync();
            debug!(entries = snapshot.entries.len(), "Disk cache index synced");
        }
        drop(synced);

        if inner.over_limit() {
            inner.schedule_eviction();
        }
        Ok(())
    }

    /// Delete every file of the store and refuse all further operations.
    ///
    /// New operations fail with [`CacheError::Destroyed`] as soon as this is
    /// called. It then waits for operations already in flight, open
    /// [`Access`]es included, before deleting anything. Calling it again, or
    /// concurrently, waits for the first call to finish.
    ///
    /// # Deadlock
    ///
    /// If the calling thread holds an unfinished [`Access`] on this cache,
    /// this never returns: it waits for a release only that thread can make.
    pub fn destroy(&self) -> Result<(), CacheError> {
        let lifecycle = self.inner.lifecycle.lock();
        match lifecycle.condition() {
            DESTROYED => return Ok(()),
            DRAINING | DRAINED => {
                drop(lifecycle);
                let _done = self.inner.lifecycle.lock_on_conditions(DESTROYED);
                return Ok(());
            }
            IDLE => lifecycle.unlock_with_condition(DRAINED),
            _ => {
                info!(in_flight = *lifecycle, "Waiting for disk cache operations before destroy");
                lifecycle.unlock_with_condition(DRAINING);
            }
        }

        let drained = self.inner.lifecycle.lock_on_conditions(DRAINED);
        let result = self.inner.remove_store();
        drained.unlock_with_condition(DESTROYED);

        info!(store = %self.inner.store_dir.display(), "Disk cache destroyed");
        result
    }
}

impl fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("store_dir", &self.inner.store_dir)
            .field("size_limit", &self.inner.size_limit)
            .finish()
    }
}

/// A pinned entry of a [`DiskCache`].
///
/// Obtained from [`DiskCache::start_access_for_key`]. The file at
/// [`path`](Self::path) is guaranteed to exist until the access is finished,
/// either explicitly or by dropping it. Accesses are `Send` and may be
/// finished on another thread.
pub struct Access {
    inner: Arc<Inner>,
    key: String,
    path: PathBuf,
}

impl Access {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// File holding the entry's bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the pin.
    pub fn finish(self) {}
}

impl Drop for Access {
    fn drop(&mut self) {
        self.inner.release_pin(&self.key, &self.path);
        self.inner.end_operation();
        if !self.inner.is_destroyed() && self.inner.over_limit() {
            self.inner.schedule_eviction();
        }
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_temp_cache() -> (DiskCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path(), 10_000_000).unwrap();
        (cache, temp_dir)
    }

    fn blob_count(cache: &DiskCache) -> usize {
        fs::read_dir(cache.store_dir().join(BLOB_DIR))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_disk_cache_new() {
        let (cache, _temp) = create_temp_cache();
        assert_eq!(cache.size_limit(), 10_000_000);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_size(), 0);
        assert!(!cache.is_destroyed());
    }

    #[test]
    fn test_disk_cache_rejects_zero_limit() {
        let temp_dir = TempDir::new().unwrap();
        let result = DiskCache::new(temp_dir.path(), 0);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_disk_cache_set_and_get() {
        let (cache, _temp) = create_temp_cache();
        let data = vec![1, 2, 3, 4, 5];

        cache.set_data("tile", &data).unwrap();
        assert_eq!(cache.data_for_key("tile").unwrap(), Some(data));
    }

    #[test]
    fn test_disk_cache_miss() {
        let (cache, _temp) = create_temp_cache();
        assert_eq!(cache.data_for_key("absent").unwrap(), None);
        assert!(!cache.contains_data_for_key("absent"));
    }

    #[test]
    fn test_disk_cache_failed_write_keeps_previous_value() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"original").unwrap();
        let size_before = cache.total_size();

        // Directories squatting on the next file names make the write fail.
        let blob_dir = cache.store_dir().join(BLOB_DIR);
        for id in 0..16 {
            let path = blob_dir.join(index::blob_file_name(id));
            if !path.exists() {
                fs::create_dir(&path).unwrap();
            }
        }

        let result = cache.set_data("k", b"replacement");
        assert!(matches!(result, Err(CacheError::Io(_))));

        assert_eq!(cache.data_for_key("k").unwrap(), Some(b"original".to_vec()));
        assert_eq!(cache.total_size(), size_before);
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.stats().disk_write_failures, 1);
        assert_eq!(cache.stats().disk_writes, 1);
    }

    #[test]
    fn test_disk_cache_contains() {
        let (cache, _temp) = create_temp_cache();

        assert!(!cache.contains_data_for_key("k"));
        cache.set_data("k", b"v").unwrap();
        assert!(cache.contains_data_for_key("k"));
    }

    #[test]
    fn test_disk_cache_empty_value() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("empty", &[]).unwrap();
        assert_eq!(cache.data_for_key("empty").unwrap(), Some(Vec::new()));
        assert_eq!(cache.total_size(), 0);
    }

    #[test]
    fn test_disk_cache_overwrite_replaces_size_and_file() {
        let (cache, _temp) = create_temp_cache();

        cache.set_data("k", &[0u8; 1000]).unwrap();
        cache.set_data("k", &[1u8; 10]).unwrap();

        assert_eq!(cache.total_size(), 10);
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(blob_count(&cache), 1);
        assert_eq!(cache.data_for_key("k").unwrap(), Some(vec![1u8; 10]));
    }

    #[test]
    fn test_disk_cache_size_tracking() {
        let (cache, _temp) = create_temp_cache();

        cache.set_data("a", &[0u8; 1000]).unwrap();
        assert_eq!(cache.total_size(), 1000);

        cache.set_data("b", &[0u8; 2000]).unwrap();
        assert_eq!(cache.total_size(), 3000);
        assert_eq!(cache.entry_count(), 2);

        assert!(cache.remove_data_for_key("a").unwrap());
        assert!(!cache.remove_data_for_key("a").unwrap());
        assert_eq!(cache.total_size(), 2000);
        assert_eq!(blob_count(&cache), 1);
    }

    #[test]
    fn test_disk_cache_missing_file_is_a_miss() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"value").unwrap();

        let path = cache.start_access_for_key("k").unwrap().unwrap().path().to_path_buf();
        fs::remove_file(&path).unwrap();

        assert_eq!(cache.data_for_key("k").unwrap(), None);
        assert!(!cache.contains_data_for_key("k"));
        assert_eq!(cache.total_size(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statistics
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_disk_cache_statistics() {
        let (cache, _temp) = create_temp_cache();

        cache.set_data("a", &[1, 2, 3]).unwrap();
        cache.set_data("b", &[4]).unwrap();
        cache.data_for_key("a").unwrap();
        cache.data_for_key("a").unwrap();
        cache.data_for_key("zzz").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.disk_writes, 2);
        assert_eq!(stats.disk_hits, 2);
        assert_eq!(stats.disk_misses, 1);
        assert_eq!(stats.disk_size_bytes, 4);
        assert_eq!(stats.disk_entry_count, 2);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pinned access
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_access_returns_readable_path() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"pinned bytes").unwrap();

        let access = cache.start_access_for_key("k").unwrap().unwrap();
        assert_eq!(access.key(), "k");
        assert_eq!(fs::read(access.path()).unwrap(), b"pinned bytes");
        assert_eq!(cache.pinned_count(), 1);
        cache.finish_access(access);
        assert_eq!(cache.pinned_count(), 0);
    }

    #[test]
    fn test_access_absent_key() {
        let (cache, _temp) = create_temp_cache();
        assert!(cache.start_access_for_key("absent").unwrap().is_none());
        // No pin was taken, so destroy must not wait.
        cache.destroy().unwrap();
    }

    #[test]
    fn test_overwrite_keeps_pinned_file_until_finished() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"old").unwrap();

        let access = cache.start_access_for_key("k").unwrap().unwrap();
        cache.set_data("k", b"new value").unwrap();

        assert_eq!(fs::read(access.path()).unwrap(), b"old");
        assert_eq!(cache.data_for_key("k").unwrap(), Some(b"new value".to_vec()));
        assert_eq!(cache.total_size(), 9);

        let old_path = access.path().to_path_buf();
        access.finish();
        assert!(!old_path.exists());
        assert_eq!(blob_count(&cache), 1);
    }

    #[test]
    fn test_remove_keeps_pinned_file_until_finished() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"data").unwrap();

        let access = cache.start_access_for_key("k").unwrap().unwrap();
        assert!(cache.remove_data_for_key("k").unwrap());
        assert!(access.path().exists());

        let path = access.path().to_path_buf();
        drop(access);
        assert!(!path.exists());
    }

    #[test]
    fn test_access_finished_on_another_thread() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"data").unwrap();

        let access = cache.start_access_for_key("k").unwrap().unwrap();
        let other = cache.clone();
        thread::spawn(move || other.finish_access(access))
            .join()
            .unwrap();

        cache.destroy().unwrap();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Eviction
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_disk_cache_eviction() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path(), 5_000).unwrap();

        for i in 0..5 {
            cache.set_data(&format!("k{i}"), &[0u8; 2_000]).unwrap();
        }
        cache.wait_for_eviction();
        cache.evict_if_over_limit().unwrap();

        assert!(cache.total_size() <= cache.size_limit());
        assert!(cache.contains_data_for_key("k4"));
        assert!(!cache.contains_data_for_key("k0"));
        assert!(cache.stats().disk_evictions >= 3);
        assert_eq!(blob_count(&cache), cache.entry_count());
    }

    #[test]
    fn test_eviction_skips_pinned_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path(), 3_000).unwrap();

        cache.set_data("pinned", &[0u8; 1_000]).unwrap();
        let access = cache.start_access_for_key("pinned").unwrap().unwrap();

        for i in 0..10 {
            cache.set_data(&format!("k{i}"), &[0u8; 1_000]).unwrap();
        }
        cache.wait_for_eviction();
        cache.evict_if_over_limit().unwrap();

        assert!(cache.contains_data_for_key("pinned"));
        assert!(access.path().exists());
        assert!(cache.total_size() <= cache.size_limit());
        drop(access);
    }

    /// Commit an entry straight into the index so no eviction is scheduled.
    fn insert_quietly(cache: &DiskCache, key: &str, size: usize) {
        let mut index = cache.inner.index.write();
        let path = index.allocate_path();
        fs::write(&path, vec![0u8; size]).unwrap();
        index.commit(key, path, size as u64);
    }

    #[test]
    fn test_eviction_with_everything_pinned_stays_over_limit() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path(), 1_000).unwrap();

        cache.set_data("a", &[0u8; 800]).unwrap();
        let a = cache.start_access_for_key("a").unwrap().unwrap();
        insert_quietly(&cache, "b", 800);
        let b = cache.start_access_for_key("b").unwrap().unwrap();

        assert_eq!(cache.evict_if_over_limit().unwrap(), 0);
        assert_eq!(cache.total_size(), 1_600);
        assert_eq!(cache.stats().disk_pinned_skips, 2);

        // Releasing a pin schedules eviction again.
        drop(a);
        cache.wait_for_eviction();
        assert_eq!(cache.total_size(), 800);
        assert!(!cache.contains_data_for_key("a"));
        assert!(cache.contains_data_for_key("b"));
        drop(b);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_disk_cache_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let cache = DiskCache::new(temp_dir.path(), 10_000_000).unwrap();
            cache.set_data("k", &[1, 2, 3, 4, 5]).unwrap();
            cache.sync().unwrap();
        }

        let cache = DiskCache::new(temp_dir.path(), 10_000_000).unwrap();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.data_for_key("k").unwrap(), Some(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_drop_persists_unsynced_changes() {
        let temp_dir = TempDir::new().unwrap();

        {
            let cache = DiskCache::new(temp_dir.path(), 10_000_000).unwrap();
            cache.set_data("k", b"kept").unwrap();
        }

        let cache = DiskCache::new(temp_dir.path(), 10_000_000).unwrap();
        assert_eq!(cache.data_for_key("k").unwrap(), Some(b"kept".to_vec()));
    }

    #[test]
    fn test_sync_skips_unchanged_index() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"v").unwrap();

        cache.sync().unwrap();
        cache.sync().unwrap();
        assert_eq!(cache.stats().syncs, 1);

        cache.data_for_key("k").unwrap();
        cache.sync().unwrap();
        assert_eq!(cache.stats().syncs, 2);
    }

    #[test]
    fn test_reopen_evicts_when_limit_shrinks() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = DiskCache::new(temp_dir.path(), 10_000).unwrap();
            for i in 0..5 {
                cache.set_data(&format!("k{i}"), &[0u8; 1_000]).unwrap();
            }
            cache.sync().unwrap();
        }

        let cache = DiskCache::new(temp_dir.path(), 2_500).unwrap();
        assert!(cache.total_size() <= 2_500);
        assert!(cache.contains_data_for_key("k4"));
        assert!(cache.contains_data_for_key("k3"));
        assert!(!cache.contains_data_for_key("k0"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Destroy
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_destroy_removes_everything() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("a", b"1").unwrap();
        cache.set_data("b", b"2").unwrap();
        cache.sync().unwrap();

        cache.destroy().unwrap();

        assert!(cache.is_destroyed());
        assert!(!cache.contains_data_for_key("a"));
        assert!(!cache.store_dir().join(BLOB_DIR).exists());
        assert!(!cache.store_dir().join(INDEX_FILE).exists());
        assert_eq!(cache.total_size(), 0);
    }

    #[test]
    fn test_operations_fail_after_destroy() {
        let (cache, _temp) = create_temp_cache();
        cache.destroy().unwrap();

        assert!(matches!(cache.set_data("k", b"v"), Err(CacheError::Destroyed)));
        assert!(matches!(cache.data_for_key("k"), Err(CacheError::Destroyed)));
        assert!(matches!(cache.start_access_for_key("k"), Err(CacheError::Destroyed)));
        assert!(matches!(cache.sync(), Err(CacheError::Destroyed)));
        assert!(matches!(cache.remove_data_for_key("k"), Err(CacheError::Destroyed)));
        // A second destroy is a no-op.
        cache.destroy().unwrap();
    }

    #[test]
    fn test_destroy_waits_for_outstanding_access() {
        let (cache, _temp) = create_temp_cache();
        cache.set_data("k", b"data").unwrap();
        let access = cache.start_access_for_key("k").unwrap().unwrap();
        let path = access.path().to_path_buf();

        let (done_tx, done_rx) = mpsc::channel();
        let destroyer = {
            let cache = cache.clone();
            thread::spawn(move || {
                cache.destroy().unwrap();
                done_tx.send(()).unwrap();
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(path.exists());
        assert!(cache.is_destroyed());
        assert!(matches!(cache.data_for_key("k"), Err(CacheError::Destroyed)));

        access.finish();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        destroyer.join().unwrap();
        assert!(!path.exists());
    }
}
