//! Background daemon that periodically syncs a disk cache.
//!
//! The daemon runs in a separate thread, persisting the cache index at a
//! fixed interval. Each sync also retries eviction when pins have kept the
//! store over its size limit.

use crate::cache::disk::DiskCache;
use crate::cache::types::CacheError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest sleep between shutdown checks.
const CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Periodic [`DiskCache::sync`] on a dedicated thread.
///
/// Stops when [`shutdown`](Self::shutdown) is called, when it is dropped,
/// or by itself once the cache has been destroyed.
pub struct SyncDaemon {
    /// Handle to the daemon thread
    thread_handle: Option<JoinHandle<()>>,
    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl SyncDaemon {
    /// Start syncing `cache` every `interval`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tiercache::cache::{DiskCache, SyncDaemon};
    /// use std::time::Duration;
    ///
    /// let cache = DiskCache::new("/tmp/store", 64 * 1024 * 1024)?;
    /// let daemon = SyncDaemon::start(cache.clone(), Duration::from_secs(30));
    /// // ... use the cache ...
    /// drop(daemon);
    /// cache.sync()?;
    /// # Ok::<(), tiercache::cache::CacheError>(())
    /// ```
    pub fn start(cache: DiskCache, interval: Duration) -> Result<Self, CacheError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("tiercache-sync".to_string())
            .spawn(move || {
                Self::run_loop(cache, interval, shutdown_clone);
            })?;

        info!(interval_ms = interval.as_millis() as u64, "Disk cache sync daemon started");

        Ok(Self {
            thread_handle: Some(thread_handle),
            shutdown,
        })
    }

    fn run_loop(cache: DiskCache, interval: Duration, shutdown: Arc<AtomicBool>) {
        let check_interval = interval.min(CHECK_INTERVAL);
        let mut elapsed = Duration::ZERO;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("Sync daemon received shutdown signal");
                break;
            }

            thread::sleep(check_interval);
            elapsed += check_interval;
            if elapsed < interval {
                continue;
            }
            elapsed = Duration::ZERO;

            match cache.sync() {
                Ok(()) => {}
                Err(CacheError::Destroyed) => {
                    debug!("Disk cache destroyed, sync daemon exiting");
                    break;
                }
                Err(e) => warn!(error = %e, "Periodic disk cache sync failed"),
            }
        }

        debug!("Sync daemon stopped");
    }

    /// Signal the daemon to shut down without waiting.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Wait for the daemon thread to finish. Call after [`shutdown`](Self::shutdown).
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Sync daemon thread panicked: {:?}", e);
            }
        }
    }

    /// Whether the daemon thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SyncDaemon {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}
