//! In-memory index of the disk cache and its persisted form.
//!
//! The index maps each key to a [`CacheEntry`] and keeps:
//! - `total_size`: the sum of every entry's `size_bytes`
//! - `recency`: a [`UseTracker`] holding exactly the indexed keys
//! - `retired`: replaced or removed files that are still pinned
//!
//! All three change together inside one method call, and the disk cache
//! only calls these methods while holding its write lock, so no reader
//! observes them out of step.
//!
//! # On-disk layout
//!
//! ```text
//! <store>/index.json          persisted index, rewritten by sync
//! <store>/blobs/<id>.blob     one file per entry, id = 16 hex digits
//! ```
//!
//! Every write to a key goes to a freshly allocated file id, so a pinned
//! file is never overwritten in place.

use crate::cache::types::CacheError;
use crate::tracker::UseTracker;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory under the store root that holds entry files.
pub const BLOB_DIR: &str = "blobs";

/// Persisted index file name.
pub const INDEX_FILE: &str = "index.json";

/// Temporary name used while replacing the index file.
pub const INDEX_TEMP_FILE: &str = "index.json.tmp";

/// Extension of entry files.
pub const BLOB_EXTENSION: &str = "blob";

/// Current persisted format version.
pub const INDEX_VERSION: u32 = 1;

/// Metadata for one cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key the entry is stored under
    pub key: String,
    /// Size of the backing file in bytes
    pub size_bytes: u64,
    /// Backing file
    pub path: PathBuf,
    /// In-flight accesses; a pinned entry is never deleted
    pub pin_count: usize,
}

/// One entry in `index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: String,
    /// File name inside the blob directory
    pub file: String,
    pub size: u64,
}

/// Contents of `index.json`.
///
/// Entries are ordered least- to most-recently used so that recency
/// survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIndex {
    pub version: u32,
    pub next_file_id: u64,
    pub entries: Vec<PersistedEntry>,
}

impl Default for PersistedIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            next_file_id: 0,
            entries: Vec::new(),
        }
    }
}

/// Statistics from opening an existing store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Entries restored from the persisted index.
    pub entries_loaded: u64,
    /// Persisted entries dropped because their file was missing or resized.
    pub entries_dropped: u64,
    /// Unreferenced files deleted from the blob directory.
    pub orphans_removed: u64,
    /// Total size of restored entries.
    pub total_bytes: u64,
    /// Whether `index.json` existed but could not be used.
    pub index_discarded: bool,
}

/// Entries selected and unlinked by one eviction pass.
#[derive(Debug, Default)]
pub struct EvictionPass {
    /// `(key, file, size)` of every evicted entry, oldest first.
    pub evicted: Vec<(String, PathBuf, u64)>,
    /// Candidates passed over because they were pinned.
    pub pinned_skipped: u64,
}

impl EvictionPass {
    pub fn freed_bytes(&self) -> u64 {
        self.evicted.iter().map(|(_, _, size)| size).sum()
    }
}

/// Key → entry map with recency order and size accounting.
#[derive(Debug)]
pub struct Index {
    entries: HashMap<String, CacheEntry>,
    recency: UseTracker<String>,
    total_size: u64,
    /// Files no longer indexed but still pinned, with their pin counts.
    retired: HashMap<PathBuf, usize>,
    next_file_id: u64,
    /// Bumped on every change that affects the persisted form.
    generation: u64,
    blob_dir: PathBuf,
}

impl Index {
    /// Create an empty index whose files live in `blob_dir`.
    pub fn new(blob_dir: PathBuf) -> Self {
        Self {
            entries: HashMap::new(),
            recency: UseTracker::new(),
            total_size: 0,
            retired: HashMap::new(),
            next_file_id: 0,
            generation: 0,
            blob_dir,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sum of all entry sizes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total pins held on indexed entries and retired files.
    pub fn pinned(&self) -> usize {
        let live: usize = self.entries.values().map(|e| e.pin_count).sum();
        live + self.retired.values().sum::<usize>()
    }

    /// Reserve a fresh file path for a write.
    pub fn allocate_path(&mut self) -> PathBuf {
        let id = self.next_file_id;
        self.next_file_id += 1;
        self.generation += 1;
        self.blob_dir.join(blob_file_name(id))
    }

    /// Point `key` at a fully written file of `size` bytes.
    ///
    /// Returns the previous file if it can be deleted right away. A pinned
    /// previous file is retired instead and handed back by [`unpin`](Self::unpin).
    pub fn commit(&mut self, key: &str, path: PathBuf, size: u64) -> Option<PathBuf> {
        let replaced = self
            .entries
            .remove(key)
            .and_then(|old| self.unlink_file(old));

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                size_bytes: size,
                path,
                pin_count: 0,
            },
        );
        self.total_size += size;
        self.recency.used_object(key.to_string());
        self.generation += 1;
        replaced
    }

    /// Take a pin on `key` and mark it used; returns its file.
    pub fn pin(&mut self, key: &str) -> Option<PathBuf> {
        let entry = self.entries.get_mut(key)?;
        entry.pin_count += 1;
        let path = entry.path.clone();
        self.recency.used_object(key.to_string());
        self.generation += 1;
        Some(path)
    }

    /// Release a pin taken by [`pin`](Self::pin) on `path`.
    ///
    /// Returns `path` if it was retired and this was its last pin, meaning
    /// the caller must delete it.
    pub fn unpin(&mut self, key: &str, path: &Path) -> Option<PathBuf> {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.path == path {
                debug_assert!(entry.pin_count > 0, "unbalanced unpin for {key}");
                entry.pin_count = entry.pin_count.saturating_sub(1);
                return None;
            }
        }

        match self.retired.get_mut(path) {
            Some(pins) if *pins > 1 => {
                *pins -= 1;
                None
            }
            Some(_) => {
                self.retired.remove(path);
                Some(path.to_path_buf())
            }
            None => {
                warn!(key, path = %path.display(), "Released a pin that was never taken");
                None
            }
        }
    }

    /// Remove `key`. Returns the file to delete now, if any.
    pub fn remove(&mut self, key: &str) -> Option<PathBuf> {
        let entry = self.entries.remove(key)?;
        self.unlink_file(entry)
    }

    /// Unlink unpinned entries, least recently used first, until the total
    /// size is within `limit` or no unpinned entry remains.
    pub fn take_eviction_victims(&mut self, limit: u64) -> EvictionPass {
        let mut pass = EvictionPass::default();
        if self.total_size <= limit {
            return pass;
        }

        let excess = self.total_size - limit;
        let mut selected = 0u64;
        let mut victims = Vec::new();
        for key in self.recency.least_recently_used_objects() {
            if selected >= excess {
                break;
            }
            let entry = &self.entries[key];
            if entry.pin_count > 0 {
                pass.pinned_skipped += 1;
                continue;
            }
            selected += entry.size_bytes;
            victims.push(key.clone());
        }

        for key in victims {
            if let Some(entry) = self.entries.remove(&key) {
                self.recency.remove_object(&key);
                self.total_size -= entry.size_bytes;
                pass.evicted.push((key, entry.path, entry.size_bytes));
            }
        }
        if !pass.evicted.is_empty() {
            self.generation += 1;
        }
        pass
    }

    /// Empty the index, returning every file it referenced, retired ones included.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.entries.drain().map(|(_, e)| e.path).collect();
        files.extend(self.retired.drain().map(|(path, _)| path));
        self.recency.clear();
        self.total_size = 0;
        self.generation += 1;
        files
    }

    /// Serializable snapshot, oldest entry first.
    pub fn snapshot(&self) -> PersistedIndex {
        let entries = self
            .recency
            .least_recently_used_objects()
            .filter_map(|key| self.entries.get(key))
            .filter_map(|entry| {
                let file = entry.path.file_name()?.to_str()?.to_string();
                Some(PersistedEntry {
                    key: entry.key.clone(),
                    file,
                    size: entry.size_bytes,
                })
            })
            .collect();

        PersistedIndex {
            version: INDEX_VERSION,
            next_file_id: self.next_file_id,
            entries,
        }
    }

    fn unlink_file(&mut self, entry: CacheEntry) -> Option<PathBuf> {
        self.recency.remove_object(&entry.key);
        self.total_size -= entry.size_bytes;
        self.generation += 1;
        if entry.pin_count > 0 {
            *self.retired.entry(entry.path).or_insert(0) += entry.pin_count;
            None
        } else {
            Some(entry.path)
        }
    }
}

#[cfg(test)]
impl Index {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &String> {
        self.recency.least_recently_used_objects()
    }
}

/// File name for a file id.
pub fn blob_file_name(id: u64) -> String {
    format!("{:016x}.{}", id, BLOB_EXTENSION)
}

/// Parse a file id back out of a blob file name.
pub fn parse_blob_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(BLOB_EXTENSION)?.strip_suffix('.')?;
    if stem.len() != 16 {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}

/// Read the persisted index of the store at `store_dir`, reconciling it
/// with the files actually present.
///
/// A missing index yields an empty store. An unreadable one is discarded
/// with a warning; every blob then counts as an orphan and is deleted.
pub fn load(store_dir: &Path) -> Result<(Index, RecoveryStats), CacheError> {
    let blob_dir = store_dir.join(BLOB_DIR);
    fs::create_dir_all(&blob_dir)?;

    let mut stats = RecoveryStats::default();
    let persisted = match fs::read(store_dir.join(INDEX_FILE)) {
        Ok(bytes) => match serde_json::from_slice::<PersistedIndex>(&bytes) {
            Ok(index) if index.version == INDEX_VERSION => index,
            Ok(index) => {
                warn!(version = index.version, "Unsupported index version, rebuilding store");
                stats.index_discarded = true;
                PersistedIndex::default()
            }
            Err(e) => {
                warn!(error = %e, "Index file unreadable, rebuilding store");
                stats.index_discarded = true;
                PersistedIndex::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => PersistedIndex::default(),
        Err(e) => return Err(e.into()),
    };

    let mut index = Index::new(blob_dir.clone());
    let mut referenced = HashSet::new();
    let mut max_id = None;

    for entry in persisted.entries {
        let Some(id) = parse_blob_file_name(&entry.file) else {
            stats.entries_dropped += 1;
            continue;
        };
        if index.contains(&entry.key) || referenced.contains(&entry.file) {
            stats.entries_dropped += 1;
            continue;
        }

        let path = blob_dir.join(&entry.file);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() == entry.size => {
                max_id = max_id.max(Some(id));
                referenced.insert(entry.file);
                index.entries.insert(
                    entry.key.clone(),
                    CacheEntry {
                        key: entry.key.clone(),
                        size_bytes: entry.size,
                        path,
                        pin_count: 0,
                    },
                );
                index.recency.used_object(entry.key);
                index.total_size += entry.size;
                stats.entries_loaded += 1;
                stats.total_bytes += entry.size;
            }
            _ => stats.entries_dropped += 1,
        }
    }

    for dir_entry in fs::read_dir(&blob_dir)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name();
        if referenced.contains(&*name.to_string_lossy()) {
            continue;
        }
        match fs::remove_file(dir_entry.path()) {
            Ok(()) => stats.orphans_removed += 1,
            Err(e) => warn!(path = %dir_entry.path().display(), error = %e, "Failed to remove orphaned file"),
        }
    }
    remove_if_exists(&store_dir.join(INDEX_TEMP_FILE))?;

    index.next_file_id = persisted
        .next_file_id
        .max(max_id.map_or(0, |id| id + 1));
    if stats.entries_dropped > 0 || stats.orphans_removed > 0 || stats.index_discarded {
        index.generation = 1;
    }

    debug!(
        loaded = stats.entries_loaded,
        dropped = stats.entries_dropped,
        orphans = stats.orphans_removed,
        total_kb = stats.total_bytes / 1_000,
        "Disk cache index recovered"
    );

    Ok((index, stats))
}

/// Durably replace the store's index file with `snapshot`.
///
/// Written to a temporary file, flushed, then renamed over the old index,
/// so a crash leaves either the old or the new index intact.
pub fn persist(store_dir: &Path, snapshot: &PersistedIndex) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(snapshot)?;
    let temp_path = store_dir.join(INDEX_TEMP_FILE);

    let mut file = File::create(&temp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, store_dir.join(INDEX_FILE))?;
    Ok(())
}

/// Delete `path`, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index_in(temp: &TempDir) -> Index {
        let blob_dir = temp.path().join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).unwrap();
        Index::new(blob_dir)
    }

    /// Allocate a file, write `size` bytes, and commit it under `key`.
    fn put(index: &mut Index, key: &str, size: usize) -> PathBuf {
        let path = index.allocate_path();
        fs::write(&path, vec![0u8; size]).unwrap();
        index.commit(key, path.clone(), size as u64);
        path
    }

    fn recency(index: &Index) -> Vec<String> {
        index.keys_by_recency().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Size accounting
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn commit_tracks_total_size() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 100);
        put(&mut index, "b", 250);

        assert_eq!(index.len(), 2);
        assert_eq!(index.total_size(), 350);
    }

    #[test]
    fn commit_replacing_returns_old_file_and_adjusts_size() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        let first = put(&mut index, "a", 100);
        let second = index.allocate_path();
        let replaced = index.commit("a", second.clone(), 40);

        assert_eq!(replaced, Some(first));
        assert_eq!(index.total_size(), 40);
        assert_eq!(index.get("a").unwrap().path, second);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_subtracts_size_and_forgets_recency() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        let path = put(&mut index, "a", 100);
        put(&mut index, "b", 10);

        assert_eq!(index.remove("a"), Some(path));
        assert_eq!(index.remove("a"), None);
        assert_eq!(index.total_size(), 10);
        assert_eq!(recency(&index), vec!["b"]);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pins
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn pin_marks_entry_most_recent() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 1);
        put(&mut index, "b", 1);
        let path = index.pin("a").unwrap();

        assert_eq!(index.get("a").unwrap().pin_count, 1);
        assert_eq!(recency(&index), vec!["b", "a"]);
        assert_eq!(index.unpin("a", &path), None);
        assert_eq!(index.get("a").unwrap().pin_count, 0);
    }

    #[test]
    fn pin_missing_key_returns_none() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);
        assert_eq!(index.pin("missing"), None);
        assert_eq!(index.pinned(), 0);
    }

    #[test]
    fn replacing_pinned_entry_retires_its_file_until_unpinned() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        let old = put(&mut index, "a", 100);
        let pinned = index.pin("a").unwrap();
        index.pin("a").unwrap();

        let new = index.allocate_path();
        assert_eq!(index.commit("a", new, 5), None);
        assert_eq!(index.total_size(), 5);
        assert_eq!(index.pinned(), 2);

        assert_eq!(index.unpin("a", &pinned), None);
        assert_eq!(index.unpin("a", &pinned), Some(old));
        assert_eq!(index.pinned(), 0);
    }

    #[test]
    fn removing_pinned_entry_retires_its_file() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 100);
        let pinned = index.pin("a").unwrap();

        assert_eq!(index.remove("a"), None);
        assert!(!index.contains("a"));
        assert_eq!(index.total_size(), 0);
        assert_eq!(index.unpin("a", &pinned), Some(pinned.clone()));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Eviction
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn eviction_takes_least_recent_first() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 100);
        put(&mut index, "b", 100);
        put(&mut index, "c", 100);
        let path = index.pin("a").unwrap();
        index.unpin("a", &path);

        let pass = index.take_eviction_victims(150);
        let keys: Vec<_> = pass.evicted.iter().map(|(k, _, _)| k.as_str()).collect();

        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(pass.freed_bytes(), 200);
        assert_eq!(index.total_size(), 100);
        assert_eq!(recency(&index), vec!["a"]);
    }

    #[test]
    fn eviction_skips_pinned_entries() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 100);
        put(&mut index, "b", 100);
        put(&mut index, "c", 100);
        index.pin("a").unwrap();
        // Pinning made "a" most recent; make it least recent again.
        index.recency.used_object("b".to_string());
        index.recency.used_object("c".to_string());

        let pass = index.take_eviction_victims(200);
        let keys: Vec<_> = pass.evicted.iter().map(|(k, _, _)| k.as_str()).collect();

        assert_eq!(keys, vec!["b"]);
        assert_eq!(pass.pinned_skipped, 1);
        assert!(index.contains("a"));
        assert_eq!(index.total_size(), 200);
    }

    #[test]
    fn eviction_when_everything_pinned_leaves_index_over_limit() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 100);
        index.pin("a").unwrap();

        let pass = index.take_eviction_victims(10);
        assert!(pass.evicted.is_empty());
        assert_eq!(pass.pinned_skipped, 1);
        assert_eq!(index.total_size(), 100);
    }

    #[test]
    fn eviction_within_limit_is_noop() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);
        put(&mut index, "a", 100);

        let generation = index.generation();
        let pass = index.take_eviction_victims(100);
        assert!(pass.evicted.is_empty());
        assert_eq!(index.generation(), generation);
    }

    #[test]
    fn drain_returns_live_and_retired_files() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 1);
        index.pin("a").unwrap();
        index.remove("a");
        put(&mut index, "b", 1);

        let files = index.drain();
        assert_eq!(files.len(), 2);
        assert!(index.is_empty());
        assert_eq!(index.total_size(), 0);
        assert_eq!(index.pinned(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // File names
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn blob_file_names_parse_back() {
        assert_eq!(blob_file_name(255), "00000000000000ff.blob");
        assert_eq!(parse_blob_file_name("00000000000000ff.blob"), Some(255));
        assert_eq!(parse_blob_file_name("ff.blob"), None);
        assert_eq!(parse_blob_file_name("00000000000000ff.tmp"), None);
        assert_eq!(parse_blob_file_name("../etc/passwd"), None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn persist_then_load_restores_entries_and_recency() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        put(&mut index, "a", 10);
        put(&mut index, "b", 20);
        put(&mut index, "c", 30);
        let path = index.pin("a").unwrap();
        index.unpin("a", &path);

        persist(temp.path(), &index.snapshot()).unwrap();
        let (loaded, stats) = load(temp.path()).unwrap();

        assert_eq!(stats.entries_loaded, 3);
        assert_eq!(stats.total_bytes, 60);
        assert_eq!(stats.orphans_removed, 0);
        assert_eq!(loaded.total_size(), 60);
        assert_eq!(recency(&loaded), vec!["b", "c", "a"]);
        assert_eq!(loaded.next_file_id, 3);
        assert!(!temp.path().join(INDEX_TEMP_FILE).exists());
    }

    #[test]
    fn load_drops_entries_with_missing_or_resized_files() {
        let temp = TempDir::new().unwrap();
        let mut index = index_in(&temp);

        let gone = put(&mut index, "gone", 10);
        let resized = put(&mut index, "resized", 10);
        put(&mut index, "kept", 10);
        persist(temp.path(), &index.snapshot()).unwrap();

        fs::remove_file(gone).unwrap();
        fs::write(&resized, vec![0u8; 3]).unwrap();

        let (loaded, stats) = load(temp.path()).unwrap();
        assert_eq!(stats.entries_loaded, 1);
        assert_eq!(stats.entries_dropped, 2);
        assert_eq!(stats.orphans_removed, 1);
        assert!(loaded.contains("kept"));
        assert!(!resized.exists());
        assert_eq!(loaded.generation(), 1);
    }

    #[test]
    fn load_removes_orphans_and_stale_temp_index() {
        let temp = TempDir::new().unwrap();
        let blob_dir = temp.path().join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).unwrap();
        fs::write(blob_dir.join(blob_file_name(7)), b"orphan").unwrap();
        fs::write(temp.path().join(INDEX_TEMP_FILE), b"{").unwrap();

        let (loaded, stats) = load(temp.path()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(stats.orphans_removed, 1);
        assert!(!temp.path().join(INDEX_TEMP_FILE).exists());
    }

    #[test]
    fn load_discards_corrupt_index() {
        let temp = TempDir::new().unwrap();
        let blob_dir = temp.path().join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).unwrap();
        fs::write(blob_dir.join(blob_file_name(0)), b"data").unwrap();
        fs::write(temp.path().join(INDEX_FILE), b"not json").unwrap();

        let (loaded, stats) = load(temp.path()).unwrap();
        assert!(stats.index_discarded);
        assert!(loaded.is_empty());
        assert_eq!(stats.orphans_removed, 1);
    }

    #[test]
    fn load_of_fresh_directory_creates_blob_dir() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("new-store");

        let (loaded, stats) = load(&store).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(stats, RecoveryStats::default());
        assert!(store.join(BLOB_DIR).is_dir());
    }

    #[test]
    fn next_file_id_never_reuses_loaded_ids() {
        let temp = TempDir::new().unwrap();
        let blob_dir = temp.path().join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).unwrap();
        fs::write(blob_dir.join(blob_file_name(41)), b"x").unwrap();

        let snapshot = PersistedIndex {
            version: INDEX_VERSION,
            next_file_id: 0,
            entries: vec![PersistedEntry {
                key: "k".to_string(),
                file: blob_file_name(41),
                size: 1,
            }],
        };
        persist(temp.path(), &snapshot).unwrap();

        let (mut loaded, _) = load(temp.path()).unwrap();
        assert_eq!(loaded.allocate_path(), blob_dir.join(blob_file_name(42)));
    }
}
