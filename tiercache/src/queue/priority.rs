//! Scheduling priority tiers and their shared thread pools.
//!
//! Each tier owns one process-wide `rayon` pool, created on first use.
//! Work in a lower tier can never occupy a higher tier's threads, which is
//! how the tier hint is honoured without touching OS thread priorities.

use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Fallback CPU count when detection fails.
pub const FALLBACK_CPU_COUNT: usize = 4;

/// Minimum number of threads in any tier's pool.
pub const MIN_POOL_THREADS: usize = 2;

/// Coarse scheduling priority for queued work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    /// Housekeeping that may be delayed indefinitely (eviction, persistence).
    Background,
    /// Work that can lag behind interactive requests.
    Low,
    /// Ordinary work.
    #[default]
    Default,
    /// Latency-sensitive work.
    High,
}

impl Priority {
    /// All tiers, lowest first.
    pub const ALL: [Priority; 4] = [
        Priority::Background,
        Priority::Low,
        Priority::Default,
        Priority::High,
    ];

    /// Number of threads in this tier's pool.
    ///
    /// - `High`, `Default`: one per CPU
    /// - `Low`: half the CPUs
    /// - `Background`: a quarter of the CPUs
    ///
    /// Never fewer than [`MIN_POOL_THREADS`].
    pub fn thread_count(self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(FALLBACK_CPU_COUNT);
        let threads = match self {
            Priority::High | Priority::Default => cpus,
            Priority::Low => cpus / 2,
            Priority::Background => cpus / 4,
        };
        threads.max(MIN_POOL_THREADS)
    }

    fn slot(self) -> &'static OnceLock<Option<rayon::ThreadPool>> {
        static BACKGROUND: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
        static LOW: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
        static DEFAULT: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
        static HIGH: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();

        match self {
            Priority::Background => &BACKGROUND,
            Priority::Low => &LOW,
            Priority::Default => &DEFAULT,
            Priority::High => &HIGH,
        }
    }

    fn pool(self) -> Option<&'static rayon::ThreadPool> {
        self.slot()
            .get_or_init(|| {
                let threads = self.thread_count();
                let result = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(move |i| format!("tiercache-{}-{}", self.name(), i))
                    .build();

                match result {
                    Ok(pool) => {
                        debug!(tier = %self, threads, "Started priority pool");
                        Some(pool)
                    }
                    Err(e) => {
                        warn!(tier = %self, error = %e, "Falling back to the global rayon pool");
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Run `work` on this tier's pool.
    pub(crate) fn spawn<F>(self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.pool() {
            Some(pool) => pool.spawn(work),
            None => rayon::spawn(work),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Priority::Background => "background",
            Priority::Low => "low",
            Priority::Default => "default",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
