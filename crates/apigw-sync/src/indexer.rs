//! The API registry: every deployed definition, indexed by API key.
//!
//! The registry detects whether a submission actually changes anything,
//! reports which labels a change touches, and folds the records of a label into
//! the resource set the cache publishes for it. It also remembers the last
//! discovery result applied to each discovery-bound cluster, so a redeployed
//! definition keeps serving the members the registry last reported.

use std::collections::HashMap;

use apigw_cache::ResourceSet;
use apigw_core::{ApiKey, Cluster, DiscoveryQuery, Endpoint, Label, Listener};
use apigw_discovery::EndpointList;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::definition::{Contribution, ParsedDefinition};

/// One deployed definition.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRecord {
    key: ApiKey,
    content: Value,
    labels: Vec<Label>,
    production: Contribution,
    sandbox: Contribution,
}

impl ApiRecord {
    /// Identity of the API.
    pub fn key(&self) -> &ApiKey {
        &self.key
    }

    /// Labels the API is deployed to.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Parsed definition content.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Production contribution.
    pub fn production(&self) -> &Contribution {
        &self.production
    }

    /// Sandbox contribution.
    pub fn sandbox(&self) -> &Contribution {
        &self.sandbox
    }

    /// Check if the record is deployed to `label`.
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// Every cluster, production first.
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.production
            .clusters
            .iter()
            .chain(self.sandbox.clusters.iter())
    }

    fn clusters_mut(&mut self) -> impl Iterator<Item = &mut Cluster> {
        self.production
            .clusters
            .iter_mut()
            .chain(self.sandbox.clusters.iter_mut())
    }
}

impl From<ParsedDefinition> for ApiRecord {
    fn from(parsed: ParsedDefinition) -> Self {
        Self {
            key: parsed.key,
            content: parsed.content,
            labels: parsed.labels,
            production: parsed.production,
            sandbox: parsed.sandbox,
        }
    }
}

/// Result of ingesting a definition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// `false` when the definition was identical to the stored one.
    pub changed: bool,
    /// Labels whose snapshot must be rebuilt: the record's previous labels
    /// followed by its new ones, without duplicates.
    pub affected_labels: Vec<Label>,
}

impl IngestOutcome {
    fn unchanged() -> Self {
        Self::default()
    }
}

#[derive(Clone, Debug)]
struct Discovered {
    query: DiscoveryQuery,
    endpoints: EndpointList,
}

/// Listener values shared by every label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerSettings {
    /// Bind address.
    pub address: String,
    /// Bind port.
    pub port: u16,
    /// Name of the route configuration served on the listener.
    pub route_config_name: String,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9090,
            route_config_name: "default".to_string(),
        }
    }
}

impl ListenerSettings {
    fn listener_for(&self, label: &Label) -> Listener {
        Listener {
            name: format!("listener_{label}"),
            address: self.address.clone(),
            port: self.port,
            route_config_name: self.route_config_name.clone(),
        }
    }
}

/// Registry of deployed definitions, kept in first-deployment order.
#[derive(Debug, Default)]
pub struct ApiRegistry {
    records: IndexMap<ApiKey, ApiRecord>,
    discovered: HashMap<String, Discovered>,
}

impl ApiRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a parsed definition.
    ///
    /// A definition equal to the stored one leaves the registry untouched and
    /// reports `changed = false`. Otherwise the record is replaced in place
    /// (keeping its original position) and the old and new labels are
    /// reported as affected.
    pub fn ingest(&mut self, parsed: ParsedDefinition) -> IngestOutcome {
        if let Some(existing) = self.records.get(&parsed.key) {
            if existing.content == parsed.content {
                trace!(api = %parsed.key, "definition unchanged");
                return IngestOutcome::unchanged();
            }
        }

        let mut record = ApiRecord::from(parsed);
        self.apply_known_endpoints(&mut record);

        let mut affected: Vec<Label> = Vec::new();
        if let Some(previous) = self.records.get(&record.key) {
            affected.extend(previous.labels.iter().cloned());
        }
        for label in &record.labels {
            if !affected.contains(label) {
                affected.push(label.clone());
            }
        }

        debug!(api = %record.key, labels = ?affected, "definition indexed");
        self.records.insert(record.key.clone(), record);

        IngestOutcome {
            changed: true,
            affected_labels: affected,
        }
    }

    /// Undeploy a definition. Returns the labels it was deployed to.
    pub fn remove(&mut self, key: &ApiKey) -> Option<Vec<Label>> {
        let record = self.records.shift_remove(key)?;
        debug!(api = %key, "definition removed");
        Some(record.labels)
    }

    /// Look up a record.
    pub fn get(&self, key: &ApiKey) -> Option<&ApiRecord> {
        self.records.get(key)
    }

    /// Number of deployed definitions.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing is deployed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in deployment order.
    pub fn iter(&self) -> impl Iterator<Item = &ApiRecord> {
        self.records.values()
    }

    /// Records deployed to a label, in deployment order.
    pub fn records_with_label<'a>(&'a self, label: &'a Label) -> impl Iterator<Item = &'a ApiRecord> {
        self.records.values().filter(move |r| r.has_label(label))
    }

    /// Every label with at least one record, in first-seen order.
    pub fn labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = Vec::new();
        for label in self.records.values().flat_map(|r| r.labels.iter()) {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        labels
    }

    /// Fold every record of a label into one resource set.
    ///
    /// Records contribute in deployment order, production before sandbox.
    /// Returns `None` when no record carries the label.
    pub fn build_resources(&self, label: &Label, listener: &ListenerSettings) -> Option<ResourceSet> {
        let mut records = self.records_with_label(label).peekable();
        records.peek()?;

        let mut builder = ResourceSet::builder(listener.route_config_name.clone())
            .listener(listener.listener_for(label));
        for record in records {
            for contribution in [&record.production, &record.sandbox] {
                builder = builder
                    .routes(contribution.routes.iter().cloned())
                    .clusters(contribution.clusters.iter().cloned());
            }
        }
        Some(builder.build())
    }

    /// Discovery-bound clusters across all records, deduplicated by name.
    ///
    /// When two records bind the same cluster name, the first deployed wins.
    pub fn discovery_clusters(&self) -> IndexMap<String, DiscoveryQuery> {
        let mut clusters = IndexMap::new();
        for cluster in self.records.values().flat_map(ApiRecord::clusters) {
            if let Some(query) = &cluster.discovery {
                clusters
                    .entry(cluster.name.clone())
                    .or_insert_with(|| query.clone());
            }
        }
        clusters
    }

    /// Last discovery result applied to a cluster.
    pub fn discovered_endpoints(&self, cluster: &str) -> Option<&EndpointList> {
        self.discovered.get(cluster).map(|d| &d.endpoints)
    }

    /// Patch every discovery-bound cluster named `cluster` with new members.
    ///
    /// Returns the labels of the patched records, empty when no record binds
    /// the cluster or when the members equal the last applied ones.
    pub fn apply_endpoints(&mut self, cluster: &str, endpoints: &EndpointList) -> Vec<Label> {
        let Some(query) = self.discovery_clusters().shift_remove(cluster) else {
            trace!(cluster, "discovery result for a cluster no longer deployed");
            return Vec::new();
        };

        if let Some(last) = self.discovered.get(cluster) {
            if last.query == query && &last.endpoints == endpoints {
                trace!(cluster, "discovery result equals the applied one");
                return Vec::new();
            }
        }

        let members: Vec<Endpoint> = endpoints.as_slice().to_vec();
        let mut affected: Vec<Label> = Vec::new();
        for record in self.records.values_mut() {
            let mut patched = false;
            for c in record.clusters_mut() {
                if c.name == cluster && c.is_discovery_bound() {
                    c.assign_endpoints(members.clone());
                    patched = true;
                }
            }
            if patched {
                for label in &record.labels {
                    if !affected.contains(label) {
                        affected.push(label.clone());
                    }
                }
            }
        }

        self.discovered.insert(
            cluster.to_string(),
            Discovered {
                query,
                endpoints: endpoints.clone(),
            },
        );
        debug!(cluster, endpoints = %endpoints, labels = ?affected, "applied discovery result");
        affected
    }

    /// Forget results of clusters that are gone or whose query changed.
    pub fn prune_discovered(&mut self) {
        let live = self.discovery_clusters();
        self.discovered
            .retain(|name, d| live.get(name).is_some_and(|q| *q == d.query));
    }

    fn apply_known_endpoints(&self, record: &mut ApiRecord) {
        for cluster in record.clusters_mut() {
            let Some(query) = &cluster.discovery else {
                continue;
            };
            if let Some(known) = self.discovered.get(&cluster.name) {
                if &known.query == query {
                    cluster.assign_endpoints(known.endpoints.as_slice().to_vec());
                }
            }
        }
    }
}
