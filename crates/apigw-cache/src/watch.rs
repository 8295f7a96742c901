//! Snapshot subscriptions.
//!
//! A [`SnapshotWatch`] receives every snapshot committed for one label. This is
//! the hook the discovery-protocol transport uses to push new versions to the
//! proxies carrying that label.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use apigw_core::Label;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::Snapshot;

/// Unique identifier for a snapshot subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value of this watch ID.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// A subscription to the snapshots of one label.
#[derive(Debug)]
pub struct SnapshotWatch {
    id: WatchId,
    label: Label,
    receiver: mpsc::Receiver<Arc<Snapshot>>,
}

impl SnapshotWatch {
    /// Get the unique identifier for this watch.
    #[inline]
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Label this watch is subscribed to.
    #[inline]
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Receive the next committed snapshot.
    ///
    /// Returns `None` once the watch has been cancelled.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.receiver.recv().await
    }

    /// Receive a committed snapshot without waiting.
    pub fn try_recv(&mut self) -> Result<Arc<Snapshot>, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

#[derive(Debug, Clone)]
struct WatchSender {
    id: WatchId,
    sender: mpsc::Sender<Arc<Snapshot>>,
}

impl WatchSender {
    /// Returns `false` when the receiving side is gone.
    ///
    /// A full channel drops the update; the subscriber catches up on the next
    /// commit or by reading the current snapshot.
    fn try_send(&self, snapshot: Arc<Snapshot>) -> bool {
        match self.sender.try_send(snapshot) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(watch_id = %self.id, "watch channel full, skipping update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Manager for snapshot subscriptions, keyed by label.
///
/// The lock is only held to clone or edit the sender lists, never while
/// sending.
#[derive(Debug)]
pub struct WatchManager {
    watches: Mutex<HashMap<Label, Vec<WatchSender>>>,
    channel_buffer: usize,
}

impl Default for WatchManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchManager {
    /// Create a new watch manager with default settings.
    pub fn new() -> Self {
        Self::with_buffer_size(16)
    }

    /// Create a new watch manager with a custom channel buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            watches: Mutex::new(HashMap::new()),
            channel_buffer: buffer_size.max(1),
        }
    }

    /// Subscribe to the snapshots of a label.
    pub fn create_watch(&self, label: Label) -> SnapshotWatch {
        let id = WatchId::next();
        let (sender, receiver) = mpsc::channel(self.channel_buffer);

        self.watches
            .lock()
            .entry(label.clone())
            .or_default()
            .push(WatchSender { id, sender });

        debug!(watch_id = %id, label = %label, "created snapshot watch");

        SnapshotWatch {
            id,
            label,
            receiver,
        }
    }

    /// Cancel a subscription.
    pub fn cancel_watch(&self, watch_id: WatchId) {
        let mut watches = self.watches.lock();
        for senders in watches.values_mut() {
            if let Some(pos) = senders.iter().position(|s| s.id == watch_id) {
                senders.swap_remove(pos);
                debug!(watch_id = %watch_id, "cancelled snapshot watch");
                return;
            }
        }

        warn!(watch_id = %watch_id, "attempted to cancel unknown snapshot watch");
    }

    /// Deliver a snapshot to every subscriber of its label.
    ///
    /// Returns the number of subscribers notified. Closed subscriptions are
    /// dropped.
    pub fn notify(&self, label: &Label, snapshot: Arc<Snapshot>) -> usize {
        let senders: Vec<WatchSender> = self.watches.lock().get(label).cloned().unwrap_or_default();
        if senders.is_empty() {
            return 0;
        }

        let closed: Vec<WatchId> = senders
            .iter()
            .filter(|s| !s.try_send(Arc::clone(&snapshot)))
            .map(|s| s.id)
            .collect();

        if !closed.is_empty() {
            let mut watches = self.watches.lock();
            if let Some(senders) = watches.get_mut(label) {
                senders.retain(|s| !closed.contains(&s.id));
                if senders.is_empty() {
                    watches.remove(label);
                }
            }
            debug!(label = %label, count = closed.len(), "removed closed snapshot watches");
        }

        let notified = senders.len() - closed.len();
        trace!(label = %label, watch_count = notified, "notified snapshot watches");
        notified
    }

    /// Number of active subscriptions for a label.
    pub fn watch_count(&self, label: &Label) -> usize {
        self.watches.lock().get(label).map_or(0, Vec::len)
    }

    /// Number of active subscriptions across all labels.
    pub fn total_watch_count(&self) -> usize {
        self.watches.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceSet;
    use apigw_core::SnapshotVersion;

    fn snapshot(label: &str) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            Label::new(label),
            SnapshotVersion::initial(),
            ResourceSet::builder("default").build(),
        ))
    }

    #[test]
    fn watch_id_unique() {
        assert_ne!(WatchId::next(), WatchId::next());
    }

    #[tokio::test]
    async fn notify_reaches_label_subscribers_only() {
        let manager = WatchManager::new();
        let mut prod = manager.create_watch(Label::new("prod"));
        let mut dev = manager.create_watch(Label::new("dev"));

        assert_eq!(manager.notify(&Label::new("prod"), snapshot("prod")), 1);

        let received = prod.recv().await.unwrap();
        assert_eq!(received.label().as_str(), "prod");
        assert!(dev.try_recv().is_err());
    }

    #[test]
    fn cancel_and_closed_watches_are_removed() {
        let manager = WatchManager::new();
        let label = Label::new("prod");

        let kept = manager.create_watch(label.clone());
        let dropped = manager.create_watch(label.clone());
        assert_eq!(manager.watch_count(&label), 2);

        manager.cancel_watch(kept.id());
        assert_eq!(manager.watch_count(&label), 1);

        drop(dropped);
        assert_eq!(manager.notify(&label, snapshot("prod")), 0);
        assert_eq!(manager.total_watch_count(), 0);
    }
}
