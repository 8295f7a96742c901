//! Snapshot consistency checks.
//!
//! A resource set is only committed when it is self-contained: a proxy applying
//! it must never see a route pointing at a cluster it does not have. A failed
//! check is a defect in the code that assembled the set, not a user error.

use std::collections::HashSet;

use apigw_core::{AdapterError, Label, Result};

use crate::ResourceSet;

/// Verify the internal references of a resource set.
///
/// Checks, in order:
/// - cluster names are unique
/// - every route targets a cluster present in the set
/// - every discovery-bound cluster carries a load assignment
/// - every listener serves the set's route configuration
pub fn check_consistency(label: &Label, resources: &ResourceSet) -> Result<()> {
    let mut cluster_names = HashSet::with_capacity(resources.clusters().len());
    for cluster in resources.clusters() {
        if !cluster_names.insert(cluster.name.as_str()) {
            return Err(AdapterError::consistency(
                label.as_str(),
                format!("cluster {} is defined more than once", cluster.name),
            ));
        }
    }

    for route in resources.routes() {
        if !cluster_names.contains(route.cluster.as_str()) {
            return Err(AdapterError::consistency(
                label.as_str(),
                format!(
                    "route {} references cluster {} which is not in the snapshot",
                    route.name, route.cluster
                ),
            ));
        }
    }

    if let Some(cluster) = resources
        .clusters()
        .iter()
        .find(|c| c.is_discovery_bound() && c.load_assignment.is_none())
    {
        return Err(AdapterError::consistency(
            label.as_str(),
            format!("discovery-bound cluster {} has no load assignment", cluster.name),
        ));
    }

    let route_config = &resources.route_config().name;
    if let Some(listener) = resources
        .listeners()
        .iter()
        .find(|l| &l.route_config_name != route_config)
    {
        return Err(AdapterError::consistency(
            label.as_str(),
            format!(
                "listener {} serves route configuration {} but the snapshot carries {}",
                listener.name, listener.route_config_name, route_config
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigw_core::{Cluster, DiscoveryQuery, Endpoint, Listener, Route};

    fn label() -> Label {
        Label::new("prod")
    }

    #[test]
    fn consistent_set_passes() {
        let set = ResourceSet::builder("default")
            .routes([Route::new("r1", "/pets", "c1")])
            .clusters([Cluster::with_static_endpoints(
                "c1",
                vec![Endpoint::new("10.0.0.1", 80)],
            )])
            .build();
        assert!(check_consistency(&label(), &set).is_ok());
    }

    #[test]
    fn dangling_route_rejected() {
        let set = ResourceSet::builder("default")
            .routes([Route::new("r1", "/pets", "missing")])
            .clusters([Cluster::with_static_endpoints("c1", vec![])])
            .build();
        let err = check_consistency(&label(), &set).unwrap_err();
        assert!(matches!(err, AdapterError::ConsistencyViolation { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn duplicate_cluster_rejected() {
        let set = ResourceSet::builder("default")
            .clusters([
                Cluster::with_static_endpoints("c1", vec![]),
                Cluster::with_static_endpoints("c1", vec![]),
            ])
            .build();
        assert!(check_consistency(&label(), &set).is_err());
    }

    #[test]
    fn discovery_cluster_without_assignment_rejected() {
        let mut cluster = Cluster::discovery_bound("c2", DiscoveryQuery::service("svc"), vec![]);
        cluster.load_assignment = None;
        let set = ResourceSet::builder("default").clusters([cluster]).build();
        assert!(check_consistency(&label(), &set).is_err());
    }

    #[test]
    fn listener_with_foreign_route_config_rejected() {
        let set = ResourceSet::builder("default")
            .listener(Listener {
                name: "l1".to_string(),
                address: "0.0.0.0".to_string(),
                port: 9090,
                route_config_name: "other".to_string(),
            })
            .build();
        assert!(check_consistency(&label(), &set).is_err());
    }
}
