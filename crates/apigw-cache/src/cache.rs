//! Cache trait and the per-label [`SnapshotCache`].
//!
//! The cache stores one snapshot per label. Readers clone an `Arc<Snapshot>`
//! out of a `DashMap` and never block writers for longer than a shard lock.
//! Versions are allocated from a separate map whose entry guard also covers
//! the snapshot swap, so a reader can never observe a label's version going
//! backwards.

use std::sync::Arc;

use apigw_core::{Label, Result, SnapshotVersion};
use dashmap::DashMap;
use tracing::{debug, error, trace};

use crate::consistency::check_consistency;
use crate::snapshot::{ResourceSet, Snapshot};
use crate::stats::CacheStats;
use crate::watch::{SnapshotWatch, WatchId, WatchManager};

/// Trait for per-label snapshot caches.
pub trait Cache: Send + Sync {
    /// Latest committed snapshot for a label.
    fn current_snapshot(&self, label: &Label) -> Option<Arc<Snapshot>>;

    /// Validate a resource set and commit it as the label's next snapshot.
    ///
    /// On error nothing changes: the previous snapshot stays current and the
    /// label's version counter is not advanced.
    fn commit(&self, label: &Label, resources: ResourceSet) -> Result<Arc<Snapshot>>;

    /// Drop the label's snapshot. Returns `true` if one existed.
    ///
    /// The label's version counter is kept, so a later commit for the same
    /// label continues from where it left off.
    fn remove_label(&self, label: &Label) -> bool;

    /// Number of labels with a current snapshot.
    fn snapshot_count(&self) -> usize;
}

/// Concurrent per-label snapshot cache.
///
/// All `DashMap` references are dropped before subscribers are notified.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: DashMap<Label, Arc<Snapshot>>,
    /// Last version handed out per label, including removed labels.
    versions: DashMap<Label, SnapshotVersion>,
    watches: WatchManager,
    stats: CacheStats,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    /// Create a new cache with default settings.
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    /// Create a new cache with a specific initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        CacheBuilder::new().capacity(capacity).build()
    }

    /// Create a cache builder.
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    /// Get cache statistics.
    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the subscription manager.
    #[inline]
    pub fn watches(&self) -> &WatchManager {
        &self.watches
    }

    /// Subscribe to every snapshot committed for a label from now on.
    ///
    /// A subscriber that needs the current state should read
    /// [`Cache::current_snapshot`] after subscribing.
    #[inline]
    pub fn subscribe(&self, label: Label) -> SnapshotWatch {
        self.watches.create_watch(label)
    }

    /// Cancel a subscription.
    #[inline]
    pub fn unsubscribe(&self, watch_id: WatchId) {
        self.watches.cancel_watch(watch_id)
    }

    /// Last version handed out for a label, even if the label was removed since.
    pub fn last_version(&self, label: &Label) -> Option<SnapshotVersion> {
        self.versions.get(label).map(|v| *v)
    }

    /// Labels with a current snapshot.
    pub fn labels(&self) -> Vec<Label> {
        self.snapshots.iter().map(|r| r.key().clone()).collect()
    }

    /// Check if a label has a current snapshot.
    pub fn has_snapshot(&self, label: &Label) -> bool {
        self.snapshots.contains_key(label)
    }

    /// Iterate over all current snapshots.
    ///
    /// Note: This acquires read locks on all shards.
    pub fn iter(&self) -> impl Iterator<Item = (Label, Arc<Snapshot>)> + '_ {
        self.snapshots
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
    }
}

impl Cache for SnapshotCache {
    fn current_snapshot(&self, label: &Label) -> Option<Arc<Snapshot>> {
        let result = self.snapshots.get(label).map(|r| Arc::clone(&*r));

        if result.is_some() {
            self.stats.record_hit();
            trace!(label = %label, "cache hit");
        } else {
            self.stats.record_miss();
            trace!(label = %label, "cache miss");
        }

        result
    }

    fn commit(&self, label: &Label, resources: ResourceSet) -> Result<Arc<Snapshot>> {
        if let Err(err) = check_consistency(label, &resources) {
            self.stats.record_rejected();
            error!(label = %label, error = %err, "refusing to commit inconsistent snapshot");
            return Err(err);
        }

        let snapshot = {
            let mut last = self.versions.entry(label.clone()).or_insert(SnapshotVersion::new(0));
            let version = last.next();
            let snapshot = Arc::new(Snapshot::new(label.clone(), version, resources));
            self.snapshots.insert(label.clone(), Arc::clone(&snapshot));
            *last = version;
            snapshot
        };
        self.stats.record_commit();

        debug!(
            label = %label,
            version = %snapshot.version(),
            resources = snapshot.resources().total_resources(),
            "committed snapshot"
        );

        let notified = self.watches.notify(label, Arc::clone(&snapshot));
        self.stats.record_notifications(notified as u64);

        Ok(snapshot)
    }

    fn remove_label(&self, label: &Label) -> bool {
        // Serialize with commit through the version entry.
        let _guard = self.versions.get_mut(label);
        let removed = self.snapshots.remove(label).is_some();
        if removed {
            self.stats.record_removal();
            debug!(label = %label, "removed label snapshot");
        }
        removed
    }

    fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}

/// Builder for a configured cache.
#[derive(Debug, Default)]
pub struct CacheBuilder {
    capacity: Option<usize>,
    watch_buffer_size: Option<usize>,
}

impl CacheBuilder {
    /// Create a new cache builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial capacity (number of labels).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Set the subscription channel buffer size.
    pub fn watch_buffer_size(mut self, size: usize) -> Self {
        self.watch_buffer_size = Some(size);
        self
    }

    /// Build the cache.
    pub fn build(self) -> SnapshotCache {
        let capacity = self.capacity.unwrap_or(16);
        let watch_buffer = self.watch_buffer_size.unwrap_or(16);

        SnapshotCache {
            snapshots: DashMap::with_capacity(capacity),
            versions: DashMap::with_capacity(capacity),
            watches: WatchManager::with_buffer_size(watch_buffer),
            stats: CacheStats::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_core::{AdapterError, Cluster, Endpoint, Route};
    use std::thread;

    fn resources(cluster: &str) -> ResourceSet {
        ResourceSet::builder("default")
            .routes([Route::new(format!("{cluster}-route"), "/", cluster)])
            .clusters([Cluster::with_static_endpoints(
                cluster,
                vec![Endpoint::new("10.0.0.1", 80)],
            )])
            .build()
    }

    #[test]
    fn first_commit_is_version_one() {
        let cache = SnapshotCache::new();
        let label = Label::new("prod");

        assert!(cache.current_snapshot(&label).is_none());
        let snapshot = cache.commit(&label, resources("c1")).unwrap();
        assert_eq!(snapshot.version(), SnapshotVersion::initial());
        assert_eq!(cache.snapshot_count(), 1);
        assert_eq!(
            cache.current_snapshot(&label).unwrap().version(),
            SnapshotVersion::new(1)
        );
    }

    #[test]
    fn versions_increase_per_label() {
        let cache = SnapshotCache::new();
        let prod = Label::new("prod");
        let dev = Label::new("dev");

        for _ in 0..3 {
            cache.commit(&prod, resources("c1")).unwrap();
        }
        cache.commit(&dev, resources("c1")).unwrap();

        assert_eq!(cache.current_snapshot(&prod).unwrap().version().as_u64(), 3);
        assert_eq!(cache.current_snapshot(&dev).unwrap().version().as_u64(), 1);
    }

    #[test]
    fn rejected_commit_keeps_previous_snapshot_and_version() {
        let cache = SnapshotCache::new();
        let label = Label::new("prod");
        cache.commit(&label, resources("c1")).unwrap();

        let broken = ResourceSet::builder("default")
            .routes([Route::new("r", "/", "missing")])
            .build();
        let err = cache.commit(&label, broken).unwrap_err();
        assert!(matches!(err, AdapterError::ConsistencyViolation { .. }));

        assert_eq!(cache.current_snapshot(&label).unwrap().version().as_u64(), 1);
        assert_eq!(cache.stats().rejected_commits(), 1);
        assert_eq!(cache.commit(&label, resources("c1")).unwrap().version().as_u64(), 2);
    }

    #[test]
    fn removed_label_never_reuses_a_version() {
        let cache = SnapshotCache::new();
        let label = Label::new("prod");
        cache.commit(&label, resources("c1")).unwrap();
        cache.commit(&label, resources("c1")).unwrap();

        assert!(cache.remove_label(&label));
        assert!(!cache.remove_label(&label));
        assert!(cache.current_snapshot(&label).is_none());
        assert_eq!(cache.last_version(&label), Some(SnapshotVersion::new(2)));

        let recreated = cache.commit(&label, resources("c1")).unwrap();
        assert_eq!(recreated.version().as_u64(), 3);
    }

    #[tokio::test]
    async fn subscribers_receive_commits() {
        let cache = SnapshotCache::builder().watch_buffer_size(4).build();
        let label = Label::new("prod");
        let mut watch = cache.subscribe(label.clone());

        cache.commit(&label, resources("c1")).unwrap();
        let snapshot = watch.recv().await.unwrap();
        assert_eq!(snapshot.version().as_u64(), 1);
        assert_eq!(cache.stats().notifications_sent(), 1);

        cache.unsubscribe(watch.id());
        assert!(watch.recv().await.is_none());
    }

    #[test]
    fn concurrent_commits_allocate_distinct_versions() {
        let cache = Arc::new(SnapshotCache::new());
        let label = Label::new("prod");
        let mut handles = vec![];

        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let label = label.clone();
            handles.push(thread::spawn(move || {
                (0..50)
                    .map(|_| cache.commit(&label, resources("c1")).unwrap().version().as_u64())
                    .collect::<Vec<_>>()
            }));
        }

        let mut versions: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("Thread panicked"))
            .collect();
        versions.sort_unstable();
        versions.dedup();

        assert_eq!(versions.len(), 400);
        assert_eq!(versions.first(), Some(&1));
        assert_eq!(versions.last(), Some(&400));
        assert_eq!(cache.current_snapshot(&label).unwrap().version().as_u64(), 400);
    }

    #[test]
    fn concurrent_readers_see_monotonic_versions() {
        let cache = Arc::new(SnapshotCache::new());
        let label = Label::new("prod");
        cache.commit(&label, resources("c1")).unwrap();

        let writer = {
            let cache = Arc::clone(&cache);
            let label = label.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    cache.commit(&label, resources("c1")).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let label = label.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..500 {
                        let v = cache.current_snapshot(&label).unwrap().version().as_u64();
                        assert!(v >= last, "version went backwards: {v} < {last}");
                        last = v;
                    }
                })
            })
            .collect();

        writer.join().expect("Thread panicked");
        for reader in readers {
            reader.join().expect("Thread panicked");
        }
    }
}
