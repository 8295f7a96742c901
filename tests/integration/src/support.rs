//! Shared fixtures.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apigw_adapter::prelude::*;
use apigw_adapter::discovery::{BlockingIndex, QueryResult};
use apigw_adapter::sync::{Contribution, ParsedDefinition};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

/// Registry double with test-controlled membership.
///
/// A blocking query returns once the membership index is past the caller's
/// index, like a Consul long-poll. Every change bumps the index, including
/// [`FakeRegistry::touch`], which keeps the members as they are.
pub struct FakeRegistry {
    members: watch::Sender<(u64, EndpointList)>,
    calls: AtomicU64,
    in_flight: Arc<AtomicUsize>,
}

impl FakeRegistry {
    /// Registry currently reporting `endpoints`.
    pub fn new(endpoints: &[(&str, u16)]) -> Arc<Self> {
        let (members, _) = watch::channel((1, endpoint_list(endpoints)));
        Arc::new(Self {
            members,
            calls: AtomicU64::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Replace the membership.
    pub fn set(&self, endpoints: &[(&str, u16)]) {
        self.members.send_modify(|(index, members)| {
            *index += 1;
            *members = endpoint_list(endpoints);
        });
    }

    /// Bump the index without changing the membership.
    pub fn touch(&self) {
        self.members.send_modify(|(index, _)| *index += 1);
    }

    /// Queries started so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries currently blocked in the registry.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceRegistry for FakeRegistry {
    async fn query(&self, _query: &DiscoveryQuery, index: &BlockingIndex) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let mut rx = self.members.subscribe();
        loop {
            let (current, endpoints) = rx.borrow_and_update().clone();
            if current > index.get(None) {
                let mut next = BlockingIndex::default();
                next.set(None, current);
                return Ok(QueryResult {
                    endpoints,
                    index: next,
                });
            }
            if rx.changed().await.is_err() {
                return Err(AdapterError::Shutdown);
            }
        }
    }
}

/// Build an endpoint list from `(host, port)` pairs.
pub fn endpoint_list(endpoints: &[(&str, u16)]) -> EndpointList {
    endpoints
        .iter()
        .map(|(host, port)| Endpoint::new(*host, *port))
        .collect()
}

/// Watch timings short enough for tests.
pub fn fast_watch_settings() -> WatchSettings {
    WatchSettings {
        retry_interval: Duration::from_millis(10),
        auth_retry_interval: Duration::from_millis(50),
        ..WatchSettings::default()
    }
}

/// Orchestrator watching clusters through `registry`.
pub fn orchestrator_with(registry: Arc<FakeRegistry>) -> Orchestrator {
    let coordinator = WatchCoordinator::new(registry, fast_watch_settings());
    Orchestrator::builder()
        .coordinator(Arc::new(coordinator))
        .build()
}

/// A parsed definition routing one path per cluster.
///
/// The content mirrors the labels and clusters, so changing either makes a
/// different definition.
pub fn api(name: &str, version: &str, labels: &[&str], clusters: Vec<Cluster>) -> ParsedDefinition {
    let routes = clusters
        .iter()
        .map(|c| Route::new(format!("{name}-{}", c.name), format!("/{name}/{}", c.name), c.name.clone()))
        .collect();
    let content = json!({
        "name": name,
        "version": version,
        "labels": labels,
        "clusters": clusters,
    });

    ParsedDefinition {
        key: ApiKey::new(name, version),
        content,
        labels: labels.iter().map(|l| Label::new(*l)).collect(),
        production: Contribution { routes, clusters },
        sandbox: Contribution::default(),
    }
}

/// Poll `check` until it holds, panicking after a few seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Endpoints of a cluster in the label's current snapshot.
pub fn served_endpoints(orchestrator: &Orchestrator, label: &str, cluster: &str) -> Option<Vec<Endpoint>> {
    let snapshot = orchestrator.current_snapshot(&Label::new(label))?;
    let cluster = snapshot.resources().cluster(cluster)?;
    Some(cluster.endpoints().to_vec())
}

/// Version of the label's current snapshot.
pub fn version_of(orchestrator: &Orchestrator, label: &str) -> Option<u64> {
    orchestrator
        .current_snapshot(&Label::new(label))
        .map(|s| s.version().as_u64())
}
