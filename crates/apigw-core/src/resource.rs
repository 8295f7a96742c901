//! Proxy resource model.
//!
//! These are the resources a label snapshot carries. The core treats them as
//! named values: it merges them, checks cross references between them, and
//! patches cluster load assignments from discovery results. Turning them into
//! wire payloads is left to the transport layer, which can walk a snapshot by
//! type through the [`Resource`] trait.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{DiscoveryQuery, TypeUrl};

/// Trait for resources stored in a snapshot.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Get the type URL for this resource.
    fn type_url(&self) -> &'static str;

    /// Get the resource name.
    fn name(&self) -> &str;

    /// Convert to Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Type alias for a shared, type-erased resource.
pub type BoxResource = Arc<dyn Resource>;

/// Transport scheme used to reach an upstream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamScheme {
    /// Plaintext HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl UpstreamScheme {
    /// Port used when a URL does not name one.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            UpstreamScheme::Http => 80,
            UpstreamScheme::Https => 443,
        }
    }
}

/// One backend member: a host and port.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP address or host name.
    pub host: String,
    /// Service port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The endpoints currently serving a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    /// Cluster the endpoints belong to.
    pub cluster_name: String,
    /// Serving endpoints.
    pub endpoints: Vec<Endpoint>,
}

impl Resource for ClusterLoadAssignment {
    fn type_url(&self) -> &'static str {
        TypeUrl::ENDPOINT
    }

    fn name(&self) -> &str {
        &self.cluster_name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An upstream target group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Stable cluster name, referenced by routes.
    pub name: String,
    /// Scheme used to reach the members.
    pub scheme: UpstreamScheme,
    /// Registry query when the members are resolved dynamically.
    pub discovery: Option<DiscoveryQuery>,
    /// Endpoints actually serving the cluster.
    pub load_assignment: Option<ClusterLoadAssignment>,
}

impl Cluster {
    /// A cluster with statically configured endpoints.
    #[must_use]
    pub fn with_static_endpoints(name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        let name = name.into();
        Self {
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: name.clone(),
                endpoints,
            }),
            name,
            scheme: UpstreamScheme::Http,
            discovery: None,
        }
    }

    /// A cluster whose members are resolved through the registry.
    ///
    /// `fallback` is served until the first discovery result is applied.
    #[must_use]
    pub fn discovery_bound(
        name: impl Into<String>,
        query: DiscoveryQuery,
        fallback: Vec<Endpoint>,
    ) -> Self {
        let mut cluster = Self::with_static_endpoints(name, fallback);
        cluster.discovery = Some(query);
        cluster
    }

    /// Set the upstream scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: UpstreamScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Check if the cluster's members come from the registry.
    #[must_use]
    pub fn is_discovery_bound(&self) -> bool {
        self.discovery.is_some()
    }

    /// Replace the load assignment with a new endpoint list.
    pub fn assign_endpoints(&mut self, endpoints: Vec<Endpoint>) {
        self.load_assignment = Some(ClusterLoadAssignment {
            cluster_name: self.name.clone(),
            endpoints,
        });
    }

    /// Endpoints currently assigned, empty when there is no assignment.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        self.load_assignment
            .as_ref()
            .map(|la| la.endpoints.as_slice())
            .unwrap_or_default()
    }
}

impl Resource for Cluster {
    fn type_url(&self) -> &'static str {
        TypeUrl::CLUSTER
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A path-prefix route to a cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route name, unique within a route configuration.
    pub name: String,
    /// Request path prefix matched by the route.
    pub path_prefix: String,
    /// Name of the cluster requests are forwarded to.
    pub cluster: String,
    /// Path prefix substituted upstream, if it differs from the match.
    pub prefix_rewrite: Option<String>,
}

impl Route {
    /// Create a route.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        path_prefix: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path_prefix: path_prefix.into(),
            cluster: cluster.into(),
            prefix_rewrite: None,
        }
    }
}

/// The routes served by a label's listener.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    /// Route configuration name, referenced by listeners.
    pub name: String,
    /// Domains matched by the single virtual host.
    pub domains: Vec<String>,
    /// Routes in match order.
    pub routes: Vec<Route>,
}

impl Resource for RouteConfiguration {
    fn type_url(&self) -> &'static str {
        TypeUrl::ROUTE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An inbound listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Listener name.
    pub name: String,
    /// Bind address.
    pub address: String,
    /// Bind port.
    pub port: u16,
    /// Route configuration served on this listener.
    pub route_config_name: String,
}

impl Resource for Listener {
    fn type_url(&self) -> &'static str {
        TypeUrl::LISTENER
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_cluster_has_assignment() {
        let cluster =
            Cluster::with_static_endpoints("c1", vec![Endpoint::new("10.0.0.1", 80)]);
        assert!(!cluster.is_discovery_bound());
        assert_eq!(cluster.endpoints(), &[Endpoint::new("10.0.0.1", 80)]);
        assert_eq!(
            cluster.load_assignment.as_ref().map(|la| la.cluster_name.as_str()),
            Some("c1")
        );
    }

    #[test]
    fn test_assign_endpoints_replaces_members() {
        let mut cluster = Cluster::discovery_bound(
            "c2",
            DiscoveryQuery::service("pets-backend"),
            vec![Endpoint::new("fallback", 80)],
        );
        assert!(cluster.is_discovery_bound());

        cluster.assign_endpoints(vec![
            Endpoint::new("10.0.0.2", 9000),
            Endpoint::new("10.0.0.3", 9000),
        ]);
        assert_eq!(cluster.endpoints().len(), 2);
        assert_eq!(cluster.endpoints()[0].to_string(), "10.0.0.2:9000");
    }

    #[test]
    fn test_resource_trait_downcast() {
        let listener = Listener {
            name: "listener_prod".to_string(),
            address: "0.0.0.0".to_string(),
            port: 9090,
            route_config_name: "default".to_string(),
        };
        let boxed: BoxResource = Arc::new(listener.clone());
        assert_eq!(boxed.type_url(), TypeUrl::LISTENER);
        assert_eq!(boxed.name(), "listener_prod");
        assert_eq!(boxed.as_any().downcast_ref::<Listener>(), Some(&listener));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(UpstreamScheme::Http.default_port(), 80);
        assert_eq!(UpstreamScheme::Https.default_port(), 443);
    }
}
