//! Snapshot: immutable, versioned resource set for one label.
//!
//! A [`ResourceSet`] is the merged contribution of every API definition that
//! carries a label. A [`Snapshot`] pairs it with the label and the version the
//! cache assigned when it was committed. Both are immutable; a change to a
//! label produces a new resource set and a new snapshot.

use std::sync::Arc;
use std::time::Instant;

use apigw_core::{
    BoxResource, Cluster, ClusterLoadAssignment, Label, Listener, Route, RouteConfiguration,
    SnapshotVersion, TypeUrl,
};

/// The proxy resources published for one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSet {
    listeners: Vec<Listener>,
    route_config: RouteConfiguration,
    clusters: Vec<Cluster>,
    endpoints: Vec<ClusterLoadAssignment>,
}

impl ResourceSet {
    /// Create a new resource set builder.
    pub fn builder(route_config_name: impl Into<String>) -> ResourceSetBuilder {
        ResourceSetBuilder::new(route_config_name)
    }

    /// Listeners, in the order they were added.
    #[inline]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// The route configuration shared by the label's listeners.
    #[inline]
    pub fn route_config(&self) -> &RouteConfiguration {
        &self.route_config
    }

    /// Routes in match order.
    #[inline]
    pub fn routes(&self) -> &[Route] {
        &self.route_config.routes
    }

    /// Clusters, in contribution order.
    #[inline]
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Load assignments materialized from the clusters.
    #[inline]
    pub fn endpoints(&self) -> &[ClusterLoadAssignment] {
        &self.endpoints
    }

    /// Find a cluster by name.
    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Resources of one type, type-erased for the transport layer.
    pub fn resources(&self, type_url: &str) -> Vec<BoxResource> {
        match type_url {
            TypeUrl::CLUSTER => self
                .clusters
                .iter()
                .map(|c| Arc::new(c.clone()) as BoxResource)
                .collect(),
            TypeUrl::ENDPOINT => self
                .endpoints
                .iter()
                .map(|e| Arc::new(e.clone()) as BoxResource)
                .collect(),
            TypeUrl::LISTENER => self
                .listeners
                .iter()
                .map(|l| Arc::new(l.clone()) as BoxResource)
                .collect(),
            TypeUrl::ROUTE => vec![Arc::new(self.route_config.clone()) as BoxResource],
            _ => Vec::new(),
        }
    }

    /// Total number of top-level resources (the route configuration counts once).
    pub fn total_resources(&self) -> usize {
        self.listeners.len() + 1 + self.clusters.len() + self.endpoints.len()
    }
}

/// Builder for [`ResourceSet`].
///
/// Routes and clusters keep the order they are added in, so a set folded from
/// the same contributions in the same order is always identical.
#[derive(Debug)]
pub struct ResourceSetBuilder {
    listeners: Vec<Listener>,
    route_config: RouteConfiguration,
    clusters: Vec<Cluster>,
}

impl ResourceSetBuilder {
    /// Create a builder for a route configuration with the given name.
    pub fn new(route_config_name: impl Into<String>) -> Self {
        Self {
            listeners: Vec::new(),
            route_config: RouteConfiguration {
                name: route_config_name.into(),
                domains: vec!["*".to_string()],
                routes: Vec::new(),
            },
            clusters: Vec::new(),
        }
    }

    /// Add a listener.
    pub fn listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Append routes.
    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.route_config.routes.extend(routes);
        self
    }

    /// Append clusters.
    pub fn clusters(mut self, clusters: impl IntoIterator<Item = Cluster>) -> Self {
        self.clusters.extend(clusters);
        self
    }

    /// Build the resource set.
    pub fn build(self) -> ResourceSet {
        let endpoints = self
            .clusters
            .iter()
            .filter_map(|c| c.load_assignment.clone())
            .collect();
        ResourceSet {
            listeners: self.listeners,
            route_config: self.route_config,
            clusters: self.clusters,
            endpoints,
        }
    }
}

/// An immutable, versioned resource set for a label.
#[derive(Debug, Clone)]
pub struct Snapshot {
    label: Label,
    version: SnapshotVersion,
    resources: ResourceSet,
    created_at: Instant,
}

impl Snapshot {
    pub(crate) fn new(label: Label, version: SnapshotVersion, resources: ResourceSet) -> Self {
        Self {
            label,
            version,
            resources,
            created_at: Instant::now(),
        }
    }

    /// Label this snapshot was published for.
    #[inline]
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Version assigned at commit.
    #[inline]
    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// The published resources.
    #[inline]
    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Get the creation timestamp.
    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}
