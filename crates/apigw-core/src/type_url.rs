//! Type URLs of the resources carried in a label snapshot.
//!
//! The discovery-protocol transport serves each snapshot per resource type;
//! these constants are the keys it uses.

/// Namespace for the resource type URLs of a label snapshot.
///
/// # Example
///
/// ```rust
/// use apigw_core::TypeUrl;
///
/// assert_eq!(TypeUrl::short_name(TypeUrl::CLUSTER), "Cluster");
/// assert!(TypeUrl::is_snapshot_type(TypeUrl::ROUTE));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct TypeUrl;

impl TypeUrl {
    /// Upstream clusters.
    pub const CLUSTER: &'static str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

    /// Cluster members.
    pub const ENDPOINT: &'static str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

    /// The label's listener.
    pub const LISTENER: &'static str = "type.googleapis.com/envoy.config.listener.v3.Listener";

    /// The label's route table.
    pub const ROUTE: &'static str =
        "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

    /// Every type carried in a label snapshot, clusters and their members
    /// first so proxies never see a route to an unknown cluster.
    pub const SNAPSHOT_TYPES: [&'static str; 4] =
        [Self::CLUSTER, Self::ENDPOINT, Self::LISTENER, Self::ROUTE];

    /// Message name at the end of a type URL, e.g. `Cluster`.
    #[must_use]
    pub fn short_name(type_url: &str) -> &str {
        type_url.rsplit(['/', '.']).next().unwrap_or(type_url)
    }

    /// Check if snapshots carry resources of this type.
    #[must_use]
    pub fn is_snapshot_type(type_url: &str) -> bool {
        Self::SNAPSHOT_TYPES.contains(&type_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names() {
        assert_eq!(TypeUrl::short_name(TypeUrl::ENDPOINT), "ClusterLoadAssignment");
        assert_eq!(TypeUrl::short_name(TypeUrl::ROUTE), "RouteConfiguration");
        assert_eq!(TypeUrl::short_name("Plain"), "Plain");
    }

    #[test]
    fn snapshot_types() {
        assert!(TypeUrl::SNAPSHOT_TYPES.iter().all(|t| TypeUrl::is_snapshot_type(t)));
        assert!(!TypeUrl::is_snapshot_type(
            "type.googleapis.com/envoy.service.runtime.v3.Runtime"
        ));
    }
}
