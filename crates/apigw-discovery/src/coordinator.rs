//! Supervision of one long-poll watch per discovery-bound cluster.
//!
//! Each watch is a tokio task that queries the registry with the last index,
//! compares the answer with the last list it delivered, and publishes the list
//! on a [`tokio::sync::watch`] channel only when it changed. Tasks stop when
//! their cancellation token fires; the in-flight query is raced against the
//! token so stopping never waits for a long-poll to time out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apigw_core::{AdapterError, DiscoveryQuery, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{BlockingIndex, EndpointList, QueryResult, ServiceRegistry};

/// Timing of the watch loops.
#[derive(Clone, Debug)]
pub struct WatchSettings {
    /// Delay before retrying after a transport or decode error.
    pub retry_interval: Duration,
    /// Delay before retrying after the registry rejected the credentials.
    pub auth_retry_interval: Duration,
    /// Minimum delay between two successful queries of one watch.
    pub min_poll_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            auth_retry_interval: Duration::from_secs(60),
            min_poll_interval: Duration::ZERO,
        }
    }
}

/// Receiving side of a cluster watch.
///
/// Clones observe the same stream of endpoint lists. The channel closes when
/// the watch is stopped.
#[derive(Clone, Debug)]
pub struct WatchSubscription {
    cluster: String,
    generation: u64,
    receiver: watch::Receiver<Option<EndpointList>>,
}

impl WatchSubscription {
    /// Cluster this subscription belongs to.
    #[inline]
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Generation of the watch; a restarted watch gets a higher one.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the next endpoint list.
    ///
    /// Returns `None` once the watch has stopped.
    pub async fn next(&mut self) -> Option<EndpointList> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(list) = self.receiver.borrow_and_update().clone() {
                return Some(list);
            }
        }
    }

    /// The most recent endpoint list, if any was delivered yet.
    pub fn latest(&self) -> Option<EndpointList> {
        self.receiver.borrow().clone()
    }
}

#[derive(Debug)]
struct ActiveWatch {
    query: DiscoveryQuery,
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
    subscription: WatchSubscription,
    emissions: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
struct Watches {
    active: HashMap<String, ActiveWatch>,
    /// Stopped tasks that have not been joined yet.
    stopping: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Starts, stops and supervises cluster watches.
pub struct WatchCoordinator {
    registry: Arc<dyn ServiceRegistry>,
    settings: WatchSettings,
    watches: Mutex<Watches>,
    generation: AtomicU64,
    root: CancellationToken,
}

impl std::fmt::Debug for WatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchCoordinator")
            .field("settings", &self.settings)
            .field("active_watches", &self.active_watches())
            .finish_non_exhaustive()
    }
}

impl WatchCoordinator {
    /// Create a coordinator querying `registry`.
    pub fn new(registry: Arc<dyn ServiceRegistry>, settings: WatchSettings) -> Self {
        Self {
            registry,
            settings,
            watches: Mutex::new(Watches::default()),
            generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Start watching a cluster.
    ///
    /// Starting a cluster that is already watched with the same query returns
    /// the existing subscription. A different query replaces the running
    /// watch. Must be called from within a tokio runtime.
    pub fn start_watch(&self, cluster: &str, query: DiscoveryQuery) -> Result<WatchSubscription> {
        let mut watches = self.watches.lock();
        if watches.closed {
            return Err(AdapterError::Shutdown);
        }

        if let Some(existing) = watches.active.get(cluster) {
            if existing.query == query {
                trace!(cluster, "watch already running");
                return Ok(existing.subscription.clone());
            }
        }
        if let Some(previous) = watches.active.remove(cluster) {
            info!(cluster, old = %previous.query, new = %query, "query changed, restarting watch");
            previous.token.cancel();
            watches.stopping.push(previous.handle);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(None);
        let token = self.root.child_token();
        let emissions = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(run_watch(
            Arc::clone(&self.registry),
            cluster.to_string(),
            query.clone(),
            self.settings.clone(),
            token.clone(),
            tx,
            Arc::clone(&emissions),
        ));

        let subscription = WatchSubscription {
            cluster: cluster.to_string(),
            generation,
            receiver: rx,
        };

        info!(cluster, query = %query, generation, "started discovery watch");

        watches.active.insert(
            cluster.to_string(),
            ActiveWatch {
                query,
                generation,
                token,
                handle,
                subscription: subscription.clone(),
                emissions,
            },
        );
        watches.stopping.retain(|h| !h.is_finished());

        Ok(subscription)
    }

    /// Stop watching a cluster. Returns `false` if it was not watched.
    ///
    /// The task exits promptly; its subscribers observe the channel closing.
    pub fn stop_watch(&self, cluster: &str) -> bool {
        let mut watches = self.watches.lock();
        match watches.active.remove(cluster) {
            Some(watch) => {
                watch.token.cancel();
                watches.stopping.push(watch.handle);
                info!(cluster, generation = watch.generation, "stopped discovery watch");
                true
            }
            None => false,
        }
    }

    /// Cancel every watch and wait for all tasks to finish.
    ///
    /// Later calls to [`start_watch`](Self::start_watch) fail with
    /// [`AdapterError::Shutdown`].
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut watches = self.watches.lock();
            watches.closed = true;
            self.root.cancel();
            let mut handles: Vec<_> = watches.active.drain().map(|(_, w)| w.handle).collect();
            handles.append(&mut watches.stopping);
            handles
        };

        let count = handles.len();
        for result in join_all(handles).await {
            if let Err(err) = result {
                error!(error = %err, "discovery watch task failed");
            }
        }
        info!(tasks = count, "discovery watches shut down");
    }

    /// Check if a cluster is being watched.
    pub fn is_watching(&self, cluster: &str) -> bool {
        self.watches.lock().active.contains_key(cluster)
    }

    /// Number of running watches.
    pub fn active_watches(&self) -> usize {
        self.watches.lock().active.len()
    }

    /// Query of a running watch.
    pub fn query_of(&self, cluster: &str) -> Option<DiscoveryQuery> {
        self.watches.lock().active.get(cluster).map(|w| w.query.clone())
    }

    /// Generation of a running watch.
    pub fn generation_of(&self, cluster: &str) -> Option<u64> {
        self.watches.lock().active.get(cluster).map(|w| w.generation)
    }

    /// Number of lists a running watch has delivered.
    pub fn emissions(&self, cluster: &str) -> Option<u64> {
        self.watches
            .lock()
            .active
            .get(cluster)
            .map(|w| w.emissions.load(Ordering::Relaxed))
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn run_watch(
    registry: Arc<dyn ServiceRegistry>,
    cluster: String,
    query: DiscoveryQuery,
    settings: WatchSettings,
    token: CancellationToken,
    tx: watch::Sender<Option<EndpointList>>,
    emissions: Arc<AtomicU64>,
) {
    let mut index = BlockingIndex::default();
    let mut last: Option<EndpointList> = None;

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = registry.query(&query, &index) => result,
        };

        let delay = match result {
            Ok(QueryResult {
                endpoints,
                index: next,
            }) => {
                index = next;
                if last.as_ref() == Some(&endpoints) {
                    trace!(cluster = %cluster, index = %index, "membership unchanged");
                } else {
                    debug!(
                        cluster = %cluster,
                        endpoints = %endpoints,
                        index = %index,
                        "membership changed"
                    );
                    last = Some(endpoints.clone());
                    emissions.fetch_add(1, Ordering::Relaxed);
                    tx.send_replace(Some(endpoints));
                }
                settings.min_poll_interval
            }
            Err(err) if err.is_retriable() => {
                warn!(
                    cluster = %cluster,
                    error = %err,
                    retry_secs = settings.retry_interval.as_secs_f64(),
                    "registry query failed, retrying"
                );
                settings.retry_interval
            }
            Err(err) => {
                error!(
                    cluster = %cluster,
                    error = %err,
                    retry_secs = settings.auth_retry_interval.as_secs_f64(),
                    "registry rejected the adapter credentials"
                );
                settings.auth_retry_interval
            }
        };

        if !pause(&token, delay).await {
            break;
        }
    }

    debug!(cluster = %cluster, emissions = emissions.load(Ordering::Relaxed), "watch loop exited");
}
