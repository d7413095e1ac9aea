//! In-memory cache with LRU eviction.

use crate::cache::stats::CacheStats;
use crate::cache::types::MemoryCacheConfig;
use crate::tracker::UseTracker;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Entry in the memory cache.
struct CacheEntry<V> {
    value: Arc<V>,
    cost: usize,
}

struct MemoryState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    recency: UseTracker<String>,
    total_cost: usize,
    stats: CacheStats,
}

impl<V> MemoryState<V> {
    fn evict_over(&mut self, max_cost: usize) {
        let mut evicted = 0;
        while self.total_cost > max_cost {
            let Some(key) = self.recency.pop_least_recently_used_object() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.total_cost -= entry.cost;
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.record_memory_eviction(evicted);
        }
    }

    fn publish_size(&mut self) {
        self.stats
            .update_memory_size(self.total_cost, self.entries.len());
    }
}

/// Bounded-cost in-memory cache of shared values.
///
/// Every value carries a cost chosen by the caller; once the sum of costs
/// exceeds `max_cost`, least recently used values are dropped. A value
/// costing more than `max_cost` on its own is not retained.
pub struct MemoryCache<V> {
    state: Mutex<MemoryState<V>>,
    max_cost: usize,
}

impl<V> MemoryCache<V> {
    /// Create a memory cache holding values up to a total cost of `max_cost`.
    pub fn new(max_cost: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                recency: UseTracker::new(),
                total_cost: 0,
                stats: CacheStats::new(),
            }),
            max_cost,
        }
    }

    pub fn with_config(config: MemoryCacheConfig) -> Self {
        Self::new(config.max_cost)
    }

    /// Get a cached value, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut state = self.state.lock();

        let value = state.entries.get(key).map(|entry| Arc::clone(&entry.value));
        match value {
            Some(value) => {
                state.recency.used_object(key.to_string());
                state.stats.record_memory_hit();
                Some(value)
            }
            None => {
                state.stats.record_memory_miss();
                None
            }
        }
    }

    /// Insert or replace a value, then evict down to the cost limit.
    ///
    /// A value costing more than `max_cost` on its own is not stored; it
    /// still replaces any older value for `key`, but leaves other entries
    /// alone.
    pub fn insert(&self, key: &str, value: Arc<V>, cost: usize) {
        let mut state = self.state.lock();

        if cost > self.max_cost {
            if let Some(old) = state.entries.remove(key) {
                state.recency.remove_object(key);
                state.total_cost -= old.cost;
                state.publish_size();
            }
            return;
        }

        if let Some(old) = state.entries.insert(key.to_string(), CacheEntry { value, cost }) {
            state.total_cost -= old.cost;
        }
        state.total_cost += cost;
        state.recency.used_object(key.to_string());

        let max_cost = self.max_cost;
        state.evict_over(max_cost);
        state.publish_size();
    }

    /// Remove a value, returning it if present.
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let mut state = self.state.lock();

        let entry = state.entries.remove(key)?;
        state.recency.remove_object(key);
        state.total_cost -= entry.cost;
        state.publish_size();
        Some(entry.value)
    }

    /// Check if a key is cached, without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Sum of the costs of all cached values.
    pub fn total_cost(&self) -> usize {
        self.state.lock().total_cost
    }

    pub fn max_cost(&self) -> usize {
        self.max_cost
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
        state.total_cost = 0;
        state.publish_size();
    }
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::with_config(MemoryCacheConfig::default())
    }
}

impl<V> fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryCache")
            .field("entries", &state.entries.len())
            .field("total_cost", &state.total_cost)
            .field("max_cost", &self.max_cost)
            .finish()
    }
}
