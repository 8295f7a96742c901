//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for cache operations.
///
/// All counters are atomic and can be read from any thread.
#[derive(Debug, Default)]
pub struct CacheStats {
    commits: AtomicU64,
    rejected_commits: AtomicU64,
    snapshot_hits: AtomicU64,
    snapshot_misses: AtomicU64,
    labels_removed: AtomicU64,
    notifications_sent: AtomicU64,
}

impl CacheStats {
    /// Create new cache statistics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.rejected_commits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.snapshot_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.snapshot_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_removal(&self) {
        self.labels_removed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_notifications(&self, count: u64) {
        self.notifications_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshots committed.
    #[inline]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Commits refused by the consistency check.
    #[inline]
    pub fn rejected_commits(&self) -> u64 {
        self.rejected_commits.load(Ordering::Relaxed)
    }

    /// Snapshot lookups that found a snapshot.
    #[inline]
    pub fn snapshot_hits(&self) -> u64 {
        self.snapshot_hits.load(Ordering::Relaxed)
    }

    /// Snapshot lookups for labels without a snapshot.
    #[inline]
    pub fn snapshot_misses(&self) -> u64 {
        self.snapshot_misses.load(Ordering::Relaxed)
    }

    /// Labels removed.
    #[inline]
    pub fn labels_removed(&self) -> u64 {
        self.labels_removed.load(Ordering::Relaxed)
    }

    /// Subscriber notifications delivered.
    #[inline]
    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    /// Lookup hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.snapshot_hits() as f64;
        let total = hits + self.snapshot_misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}
