//! The update orchestrator.
//!
//! Ties the registry of definitions, the snapshot cache and the discovery
//! watches together. Every mutation (a definition submitted or removed, a
//! discovery result applied) runs under one lock, so snapshot rebuilds never
//! interleave and every label's versions are committed in order.
//!
//! Discovery results reach the orchestrator through one forwarder task per
//! watch. A forwarder only holds a weak reference to the orchestrator and
//! tags its results with the watch generation; results of a superseded watch
//! are dropped.
//!
//! With an HTTPS registry the orchestrator also owns the credential rotation
//! tasks: a listener applying new TLS material to the registry client and,
//! when a mesh service is configured, the watcher producing that material.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use apigw_cache::{Cache, SnapshotCache, Snapshot};
use apigw_core::{AdapterError, ApiKey, DiscoveryQuery, Label, Result, SnapshotVersion};
use apigw_discovery::{
    EndpointList, MeshCredentialWatcher, RegistryClient, ServiceRegistry, TlsMaterial, WatchCoordinator,
    WatchSettings, WatchSubscription,
};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::AdapterConfig;
use crate::definition::{DefinitionParser, ParsedDefinition};
use crate::indexer::{ApiRegistry, ListenerSettings};
use crate::metrics::AdapterMetrics;
use crate::openapi::OpenApiParser;
use crate::shutdown::ShutdownController;

/// Capacity of the channel between the mesh watcher and the rotation listener.
const ROTATION_CHANNEL_CAPACITY: usize = 4;

/// What a mutation did to the cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// `false` when the mutation was a no-op.
    pub changed: bool,
    /// Labels committed, with their new versions.
    pub published: Vec<(Label, SnapshotVersion)>,
    /// Labels removed from the cache after losing every contributor.
    pub removed: Vec<Label>,
    /// Labels whose rebuilt snapshot failed the consistency check; their
    /// previous snapshot stays active.
    pub rejected: Vec<Label>,
}

impl UpdateReport {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }

    /// Version committed for `label` by this mutation.
    pub fn version_of(&self, label: &Label) -> Option<SnapshotVersion> {
        self.published
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone)]
struct WatchedCluster {
    query: DiscoveryQuery,
    generation: u64,
}

#[derive(Debug, Default)]
struct SyncState {
    registry: ApiRegistry,
    watched: HashMap<String, WatchedCluster>,
    warned_disabled: HashSet<String>,
}

struct Inner {
    cache: Arc<SnapshotCache>,
    parser: Arc<dyn DefinitionParser>,
    coordinator: Option<Arc<WatchCoordinator>>,
    registry_client: Option<Arc<RegistryClient>>,
    listener: ListenerSettings,
    shutdown: ShutdownController,
    metrics: AdapterMetrics,
    state: Mutex<SyncState>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
    /// Credential rotation tasks, stopped through `background`.
    rotation_tasks: Mutex<Vec<JoinHandle<()>>>,
    background: CancellationToken,
}

/// Keeps the snapshot cache in line with deployed definitions and the
/// registry's view of discovery-bound clusters. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("listener", &self.inner.listener)
            .field("discovery_enabled", &self.is_discovery_enabled())
            .field("apis", &self.api_count())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Build an orchestrator from configuration.
    ///
    /// When discovery is enabled but its credentials cannot be loaded or
    /// used, the orchestrator runs with discovery disabled and discovery-bound
    /// clusters serve their default host. Other configuration errors are
    /// returned. A configured mesh service starts the credential watcher, so
    /// this must then run inside a tokio runtime.
    pub fn from_config(config: &AdapterConfig) -> Result<Self> {
        let mut builder = Self::builder().listener(config.listener_settings());

        let client_config = match config.discovery.registry_client_config() {
            Ok(client_config) => client_config,
            Err(err @ AdapterError::CredentialLoad { .. }) => {
                warn!(error = %err, "discovery credentials unavailable, discovery disabled");
                None
            }
            Err(err) => return Err(err),
        };

        if let Some(client_config) = client_config {
            match RegistryClient::new(client_config) {
                Ok(client) => {
                    let client = Arc::new(client);
                    let settings = config.discovery.watch_settings();
                    let registry: Arc<dyn ServiceRegistry> = client.clone();
                    let coordinator = WatchCoordinator::new(registry, settings.clone());
                    builder = builder
                        .coordinator(Arc::new(coordinator))
                        .registry_client(client);
                    if let Some(service) = config.discovery.mesh_service() {
                        builder = builder.mesh_credentials(service, settings);
                    }
                }
                Err(err @ AdapterError::CredentialLoad { .. }) => {
                    warn!(error = %err, "discovery credentials unusable, discovery disabled");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(builder.build())
    }

    /// Parse and ingest a definition.
    ///
    /// Refused with [`AdapterError::Shutdown`] once shutdown has started.
    /// A malformed definition is rejected with [`AdapterError::Parse`] and
    /// leaves every snapshot untouched. Spawns discovery watches, so it must
    /// run inside a tokio runtime.
    pub fn submit_definition(&self, bytes: &[u8]) -> Result<UpdateReport> {
        if self.inner.shutdown.is_shutdown() {
            return Err(AdapterError::Shutdown);
        }
        let _op = self.inner.shutdown.register_operation();

        let parsed = self.inner.parser.parse(bytes).map_err(|err| {
            warn!(error = %err, "rejected definition");
            err
        })?;
        self.on_definition_ingested(parsed)
    }

    /// Ingest an already parsed definition.
    ///
    /// An identical definition is a no-op. Otherwise every label the
    /// definition was or is deployed to is republished and the discovery
    /// watches are reconciled with the clusters still referenced.
    pub fn on_definition_ingested(&self, parsed: ParsedDefinition) -> Result<UpdateReport> {
        if self.inner.shutdown.is_shutdown() {
            return Err(AdapterError::Shutdown);
        }

        let mut state = self.inner.state.lock();
        let key = parsed.key.clone();
        let outcome = state.registry.ingest(parsed);
        if !outcome.changed {
            debug!(api = %key, "definition unchanged, nothing to publish");
            return Ok(UpdateReport::unchanged());
        }

        let mut report = UpdateReport::changed();
        for label in &outcome.affected_labels {
            self.inner.publish_into(&state, label, &mut report);
        }
        self.inner.reconcile_watches(&mut state);

        info!(
            api = %key,
            published = report.published.len(),
            rejected = report.rejected.len(),
            "definition deployed"
        );
        Ok(report)
    }

    /// Undeploy a definition.
    ///
    /// Labels that lose their last contributor are removed from the cache.
    pub fn remove_definition(&self, key: &ApiKey) -> Result<UpdateReport> {
        if self.inner.shutdown.is_shutdown() {
            return Err(AdapterError::Shutdown);
        }
        let _op = self.inner.shutdown.register_operation();

        let mut state = self.inner.state.lock();
        let Some(labels) = state.registry.remove(key) else {
            debug!(api = %key, "definition not deployed");
            return Ok(UpdateReport::unchanged());
        };

        let mut report = UpdateReport::changed();
        for label in &labels {
            self.inner.publish_into(&state, label, &mut report);
        }
        self.inner.reconcile_watches(&mut state);

        info!(api = %key, "definition removed");
        Ok(report)
    }

    /// Apply a discovery result to every cluster named `cluster`.
    ///
    /// A no-op when no deployed definition binds the cluster or when the
    /// endpoints equal the last applied ones.
    pub fn on_discovery_update(&self, cluster: &str, endpoints: EndpointList) -> UpdateReport {
        let mut state = self.inner.state.lock();
        self.inner.apply_endpoints(&mut state, cluster, &endpoints)
    }

    /// Rebuild and commit one label.
    ///
    /// Returns the committed snapshot, or `None` when the label has no
    /// contributor left and was removed instead.
    pub fn publish(&self, label: &Label) -> Result<Option<Arc<Snapshot>>> {
        let state = self.inner.state.lock();
        self.inner.publish(&state, label)
    }

    /// Snapshot currently served for a label.
    pub fn current_snapshot(&self, label: &Label) -> Option<Arc<Snapshot>> {
        self.inner.cache.current_snapshot(label)
    }

    /// The snapshot cache, for transports and readers.
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.inner.cache
    }

    /// Metrics handle.
    pub fn metrics(&self) -> &AdapterMetrics {
        &self.inner.metrics
    }

    /// Check if discovery-bound clusters are watched.
    pub fn is_discovery_enabled(&self) -> bool {
        self.inner.coordinator.is_some()
    }

    /// Registry client, present when discovery is enabled through
    /// configuration or [`OrchestratorBuilder::registry_client`].
    pub fn registry_client(&self) -> Option<&Arc<RegistryClient>> {
        self.inner.registry_client.as_ref()
    }

    /// Replace the registry client's TLS material now.
    ///
    /// Fails with [`AdapterError::Configuration`] when there is no HTTPS
    /// registry client; on any error the current material stays in use.
    pub fn rotate_credentials(&self, material: TlsMaterial) -> Result<()> {
        let client = self.inner.registry_client.as_ref().ok_or_else(|| {
            AdapterError::Configuration("discovery is disabled, no credentials to rotate".to_string())
        })?;
        client.rotate(material)
    }

    /// Clusters currently watched, sorted.
    pub fn watched_clusters(&self) -> Vec<String> {
        let mut clusters: Vec<String> = self.inner.state.lock().watched.keys().cloned().collect();
        clusters.sort();
        clusters
    }

    /// Number of deployed definitions.
    pub fn api_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Labels with at least one deployed definition.
    pub fn labels(&self) -> Vec<Label> {
        self.inner.state.lock().registry.labels()
    }

    /// Shutdown controller shared with callers.
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.inner.shutdown
    }

    /// Stop accepting work, wait for in-flight submissions, then stop every
    /// watch, forwarder and credential rotation task.
    ///
    /// Returns `false` if submissions were still running when `grace_period`
    /// elapsed.
    pub async fn shutdown(&self, grace_period: Duration) -> bool {
        let drained = self.inner.shutdown.shutdown(grace_period).await;

        if let Some(coordinator) = &self.inner.coordinator {
            coordinator.shutdown().await;
        }

        let forwarders = std::mem::take(&mut *self.inner.forwarders.lock());
        for result in join_all(forwarders).await {
            if let Err(err) = result {
                warn!(error = %err, "discovery forwarder ended abnormally");
            }
        }

        self.inner.background.cancel();
        let rotation_tasks = std::mem::take(&mut *self.inner.rotation_tasks.lock());
        for result in join_all(rotation_tasks).await {
            if let Err(err) = result {
                warn!(error = %err, "credential rotation task ended abnormally");
            }
        }

        self.inner.state.lock().watched.clear();
        self.inner.metrics.set_active_watches(0);
        info!("orchestrator stopped");
        drained
    }
}

impl Inner {
    fn publish(&self, state: &SyncState, label: &Label) -> Result<Option<Arc<Snapshot>>> {
        let Some(resources) = state.registry.build_resources(label, &self.listener) else {
            if self.cache.remove_label(label) {
                self.metrics.label_removed(label);
                info!(label = %label, "label has no deployed definitions, removed");
            }
            return Ok(None);
        };

        match self.cache.commit(label, resources) {
            Ok(snapshot) => {
                self.metrics.snapshot_published(label, snapshot.version());
                debug!(
                    label = %label,
                    version = %snapshot.version(),
                    resources = snapshot.resources().total_resources(),
                    "published snapshot"
                );
                Ok(Some(snapshot))
            }
            Err(err) => {
                self.metrics.publish_failed(label);
                Err(err)
            }
        }
    }

    fn publish_into(&self, state: &SyncState, label: &Label, report: &mut UpdateReport) {
        match self.publish(state, label) {
            Ok(Some(snapshot)) => report.published.push((label.clone(), snapshot.version())),
            Ok(None) => report.removed.push(label.clone()),
            Err(err) => {
                warn!(label = %label, error = %err, "previous snapshot stays active");
                report.rejected.push(label.clone());
            }
        }
    }

    fn apply_endpoints(&self, state: &mut SyncState, cluster: &str, endpoints: &EndpointList) -> UpdateReport {
        let labels = state.registry.apply_endpoints(cluster, endpoints);
        if labels.is_empty() {
            return UpdateReport::unchanged();
        }

        self.metrics.discovery_applied(cluster);
        let mut report = UpdateReport::changed();
        for label in &labels {
            self.publish_into(state, label, &mut report);
        }
        info!(cluster, endpoints = %endpoints, labels = labels.len(), "applied discovery result");
        report
    }

    fn apply_watch_result(&self, cluster: &str, generation: u64, endpoints: &EndpointList) {
        let mut state = self.state.lock();
        match state.watched.get(cluster) {
            Some(watched) if watched.generation == generation => {}
            _ => {
                trace!(cluster, generation, "dropping result of a superseded watch");
                return;
            }
        }
        self.apply_endpoints(&mut state, cluster, endpoints);
    }

    fn reconcile_watches(self: &Arc<Self>, state: &mut SyncState) {
        let wanted = state.registry.discovery_clusters();

        let Some(coordinator) = &self.coordinator else {
            for (cluster, query) in &wanted {
                if state.warned_disabled.insert(cluster.clone()) {
                    warn!(cluster = %cluster, query = %query, "discovery disabled, serving the default host");
                }
            }
            state.registry.prune_discovered();
            return;
        };

        let stale: Vec<String> = state
            .watched
            .keys()
            .filter(|cluster| !wanted.contains_key(*cluster))
            .cloned()
            .collect();
        for cluster in stale {
            coordinator.stop_watch(&cluster);
            state.watched.remove(&cluster);
            info!(cluster = %cluster, "cluster no longer referenced, watch stopped");
        }

        for (cluster, query) in wanted {
            if state
                .watched
                .get(&cluster)
                .is_some_and(|watched| watched.query == query)
            {
                continue;
            }
            match coordinator.start_watch(&cluster, query.clone()) {
                Ok(subscription) => {
                    state.watched.insert(
                        cluster,
                        WatchedCluster {
                            query,
                            generation: subscription.generation(),
                        },
                    );
                    self.spawn_forwarder(subscription);
                }
                Err(err) => warn!(cluster = %cluster, error = %err, "cannot start discovery watch"),
            }
        }

        state.registry.prune_discovered();
        self.metrics.set_active_watches(state.watched.len());
    }

    fn spawn_forwarder(self: &Arc<Self>, mut subscription: WatchSubscription) {
        let inner: Weak<Inner> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let cluster = subscription.cluster().to_string();
            let generation = subscription.generation();
            while let Some(endpoints) = subscription.next().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.apply_watch_result(&cluster, generation, &endpoints);
            }
            trace!(cluster, generation, "discovery forwarder finished");
        });

        let mut forwarders = self.forwarders.lock();
        forwarders.retain(|h| !h.is_finished());
        forwarders.push(handle);
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    cache: Option<Arc<SnapshotCache>>,
    parser: Option<Arc<dyn DefinitionParser>>,
    coordinator: Option<Arc<WatchCoordinator>>,
    registry_client: Option<Arc<RegistryClient>>,
    rotation: Option<mpsc::Receiver<TlsMaterial>>,
    mesh: Option<(String, WatchSettings)>,
    listener: ListenerSettings,
    shutdown: Option<ShutdownController>,
    metrics: Option<AdapterMetrics>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    /// Create a builder with an empty cache, the OpenAPI parser and
    /// discovery disabled.
    pub fn new() -> Self {
        Self {
            cache: None,
            parser: None,
            coordinator: None,
            registry_client: None,
            rotation: None,
            mesh: None,
            listener: ListenerSettings::default(),
            shutdown: None,
            metrics: None,
        }
    }

    /// Publish into an existing cache.
    pub fn cache(mut self, cache: Arc<SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use a different definition parser.
    pub fn parser(mut self, parser: impl DefinitionParser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Enable discovery through a watch coordinator.
    pub fn coordinator(mut self, coordinator: Arc<WatchCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Registry client whose TLS material the orchestrator rotates.
    pub fn registry_client(mut self, client: Arc<RegistryClient>) -> Self {
        self.registry_client = Some(client);
        self
    }

    /// Apply TLS material received on `updates` to the registry client until
    /// shutdown.
    pub fn credential_rotation(mut self, updates: mpsc::Receiver<TlsMaterial>) -> Self {
        self.rotation = Some(updates);
        self
    }

    /// Follow the registry's Connect CA for `service` and rotate the registry
    /// client onto every renewed certificate.
    pub fn mesh_credentials(mut self, service: impl Into<String>, settings: WatchSettings) -> Self {
        self.mesh = Some((service.into(), settings));
        self
    }

    /// Listener values shared by every label.
    pub fn listener(mut self, listener: ListenerSettings) -> Self {
        self.listener = listener;
        self
    }

    /// Share a shutdown controller with other components.
    pub fn shutdown_controller(mut self, controller: ShutdownController) -> Self {
        self.shutdown = Some(controller);
        self
    }

    /// Record into an existing metrics handle.
    pub fn metrics(mut self, metrics: AdapterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the orchestrator.
    ///
    /// Credential rotation tasks are spawned here, so a builder with a
    /// registry client and a rotation source must be built inside a tokio
    /// runtime.
    pub fn build(self) -> Orchestrator {
        let background = CancellationToken::new();
        let mut rotation_tasks = Vec::new();

        match (&self.registry_client, self.rotation, self.mesh) {
            (Some(client), Some(updates), mesh) => {
                if let Some((service, _)) = mesh {
                    warn!(service = %service, "explicit rotation channel given, mesh credentials not watched");
                }
                rotation_tasks.push(client.spawn_rotation_listener(updates, background.child_token()));
            }
            (Some(client), None, Some((service, settings))) => {
                let (tx, rx) = mpsc::channel(ROTATION_CHANNEL_CAPACITY);
                rotation_tasks.push(client.spawn_rotation_listener(rx, background.child_token()));
                rotation_tasks.push(
                    MeshCredentialWatcher::new(Arc::clone(client), service, settings)
                        .spawn(tx, background.child_token()),
                );
            }
            (None, Some(_), _) | (None, _, Some(_)) => {
                warn!("credential rotation needs a registry client, ignored");
            }
            (Some(_), None, None) | (None, None, None) => {}
        }

        Orchestrator {
            inner: Arc::new(Inner {
                cache: self.cache.unwrap_or_default(),
                parser: self.parser.unwrap_or_else(|| Arc::new(OpenApiParser::new())),
                coordinator: self.coordinator,
                registry_client: self.registry_client,
                listener: self.listener,
                shutdown: self.shutdown.unwrap_or_default(),
                metrics: self.metrics.unwrap_or_default(),
                state: Mutex::new(SyncState::default()),
                forwarders: Mutex::new(Vec::new()),
                rotation_tasks: Mutex::new(rotation_tasks),
                background,
            }),
        }
    }
}
