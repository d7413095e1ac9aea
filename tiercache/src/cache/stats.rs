//! Cache statistics tracking.

use std::time::Instant;

/// Counters for one or both cache tiers.
///
/// Each tier records into its own `CacheStats`; [`CacheStats::merge`]
/// combines them for a two-level view.
#[derive(Debug, Clone)]
pub struct CacheStats {
    // Memory tier
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_evictions: u64,
    pub memory_cost: usize,
    pub memory_entry_count: usize,

    // Disk tier
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub disk_writes: u64,
    pub disk_write_failures: u64,
    pub disk_evictions: u64,
    pub disk_evicted_bytes: u64,
    /// Eviction candidates passed over because they were pinned
    pub disk_pinned_skips: u64,
    pub disk_size_bytes: u64,
    pub disk_entry_count: usize,
    pub syncs: u64,

    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    /// Create a zeroed statistics tracker.
    pub fn new() -> Self {
        Self {
            memory_hits: 0,
            memory_misses: 0,
            memory_evictions: 0,
            memory_cost: 0,
            memory_entry_count: 0,
            disk_hits: 0,
            disk_misses: 0,
            disk_writes: 0,
            disk_write_failures: 0,
            disk_evictions: 0,
            disk_evicted_bytes: 0,
            disk_pinned_skips: 0,
            disk_size_bytes: 0,
            disk_entry_count: 0,
            syncs: 0,
            created_at: Instant::now(),
        }
    }

    /// Memory tier hit rate (0.0 to 1.0).
    pub fn memory_hit_rate(&self) -> f64 {
        ratio(self.memory_hits, self.memory_hits + self.memory_misses)
    }

    /// Disk tier hit rate (0.0 to 1.0).
    pub fn disk_hit_rate(&self) -> f64 {
        ratio(self.disk_hits, self.disk_hits + self.disk_misses)
    }

    /// Hit rate across both tiers (0.0 to 1.0).
    ///
    /// A lookup that misses memory and hits disk counts once, as a hit.
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.disk_hits;
        ratio(hits, hits + self.disk_misses)
    }

    /// Time since the tracker was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn record_memory_hit(&mut self) {
        self.memory_hits += 1;
    }

    pub fn record_memory_miss(&mut self) {
        self.memory_misses += 1;
    }

    pub fn record_memory_eviction(&mut self, count: u64) {
        self.memory_evictions += count;
    }

    pub fn record_disk_hit(&mut self) {
        self.disk_hits += 1;
    }

    pub fn record_disk_miss(&mut self) {
        self.disk_misses += 1;
    }

    pub fn record_disk_write(&mut self) {
        self.disk_writes += 1;
    }

    pub fn record_disk_write_failure(&mut self) {
        self.disk_write_failures += 1;
    }

    /// Record one eviction pass.
    pub fn record_disk_eviction(&mut self, count: u64, bytes: u64, pinned_skips: u64) {
        self.disk_evictions += count;
        self.disk_evicted_bytes += bytes;
        self.disk_pinned_skips += pinned_skips;
    }

    pub fn record_sync(&mut self) {
        self.syncs += 1;
    }

    /// Update memory tier occupancy.
    pub fn update_memory_size(&mut self, cost: usize, entry_count: usize) {
        self.memory_cost = cost;
        self.memory_entry_count = entry_count;
    }

    /// Update disk tier occupancy.
    pub fn update_disk_size(&mut self, size_bytes: u64, entry_count: usize) {
        self.disk_size_bytes = size_bytes;
        self.disk_entry_count = entry_count;
    }

    /// Combine memory-tier counters from `memory` with disk-tier counters
    /// from `disk`.
    pub fn merge(memory: &CacheStats, disk: &CacheStats) -> CacheStats {
        CacheStats {
            memory_hits: memory.memory_hits,
            memory_misses: memory.memory_misses,
            memory_evictions: memory.memory_evictions,
            memory_cost: memory.memory_cost,
            memory_entry_count: memory.memory_entry_count,
            created_at: memory.created_at.min(disk.created_at),
            ..disk.clone()
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}
