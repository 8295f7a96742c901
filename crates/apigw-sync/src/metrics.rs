//! Metrics emitted by the orchestrator.
//!
//! Recorded through the [`metrics`] facade; installing an exporter is left to
//! the embedding binary.
//!
//! - `apigw_publishes_total{label}` - snapshots committed
//! - `apigw_publish_failures_total{label}` - commits rejected by the consistency check
//! - `apigw_labels_removed_total{label}` - labels dropped after losing every contributor
//! - `apigw_discovery_updates_total{cluster}` - discovery results applied
//! - `apigw_active_watches` - discovery-bound clusters being watched
//! - `apigw_snapshot_version{label}` - last committed version per label

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use apigw_core::{Label, SnapshotVersion};
use metrics::{counter, gauge};

/// Orchestrator metrics handle. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct AdapterMetrics {
    inner: Arc<AdapterMetricsInner>,
}

#[derive(Debug, Default)]
struct AdapterMetricsInner {
    active_watches: AtomicU64,
    publishes: AtomicU64,
    publish_failures: AtomicU64,
}

impl AdapterMetrics {
    /// Create a new metrics handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed snapshot.
    pub fn snapshot_published(&self, label: &Label, version: SnapshotVersion) {
        self.inner.publishes.fetch_add(1, Ordering::Relaxed);
        counter!("apigw_publishes_total", "label" => label.to_string()).increment(1);
        gauge!("apigw_snapshot_version", "label" => label.to_string()).set(version.as_u64() as f64);
    }

    /// Record a rejected commit.
    pub fn publish_failed(&self, label: &Label) {
        self.inner.publish_failures.fetch_add(1, Ordering::Relaxed);
        counter!("apigw_publish_failures_total", "label" => label.to_string()).increment(1);
    }

    /// Record a label removed from the cache.
    pub fn label_removed(&self, label: &Label) {
        counter!("apigw_labels_removed_total", "label" => label.to_string()).increment(1);
    }

    /// Record a discovery result that changed at least one cluster.
    pub fn discovery_applied(&self, cluster: &str) {
        counter!("apigw_discovery_updates_total", "cluster" => cluster.to_string()).increment(1);
    }

    /// Set the number of watched clusters.
    pub fn set_active_watches(&self, count: usize) {
        self.inner
            .active_watches
            .store(count as u64, Ordering::Relaxed);
        gauge!("apigw_active_watches").set(count as f64);
    }

    /// Current number of watched clusters.
    pub fn active_watches(&self) -> u64 {
        self.inner.active_watches.load(Ordering::Relaxed)
    }

    /// Snapshots committed since startup.
    pub fn publishes(&self) -> u64 {
        self.inner.publishes.load(Ordering::Relaxed)
    }

    /// Commits rejected since startup.
    pub fn publish_failures(&self) -> u64 {
        self.inner.publish_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_calls() {
        let metrics = AdapterMetrics::new();
        let label = Label::new("prod");

        metrics.snapshot_published(&label, SnapshotVersion::initial());
        metrics.snapshot_published(&label, SnapshotVersion::new(2));
        metrics.publish_failed(&label);
        metrics.set_active_watches(3);

        assert_eq!(metrics.publishes(), 2);
        assert_eq!(metrics.publish_failures(), 1);
        assert_eq!(metrics.active_watches(), 3);
    }

    #[test]
    fn clones_share_state() {
        let metrics = AdapterMetrics::new();
        let clone = metrics.clone();
        clone.set_active_watches(5);
        assert_eq!(metrics.active_watches(), 5);
    }
}
