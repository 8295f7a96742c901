//! End-to-end scenarios: definitions in, snapshots out.

use std::time::Duration;

use apigw_adapter::prelude::*;

use crate::support::*;

#[tokio::test]
async fn static_cluster_is_published_at_version_one() {
    let orchestrator = Orchestrator::builder().build();
    let report = orchestrator
        .on_definition_ingested(api(
            "pets",
            "1.0",
            &["prod"],
            vec![Cluster::with_static_endpoints("c1", vec![Endpoint::new("10.0.0.1", 80)])],
        ))
        .unwrap();

    assert!(report.changed);
    assert_eq!(version_of(&orchestrator, "prod"), Some(1));
    assert_eq!(
        served_endpoints(&orchestrator, "prod", "c1"),
        Some(vec![Endpoint::new("10.0.0.1", 80)])
    );

    let snapshot = orchestrator.current_snapshot(&Label::new("prod")).unwrap();
    assert_eq!(snapshot.resources().routes().len(), 1);
    assert_eq!(snapshot.resources().routes()[0].cluster, "c1");
    assert_eq!(snapshot.resources().listeners()[0].name, "listener_prod");
}

#[tokio::test]
async fn discovery_result_bumps_the_version_once() {
    let registry = FakeRegistry::new(&[("10.0.0.2", 9000), ("10.0.0.3", 9000)]);
    let orchestrator = orchestrator_with(registry.clone());

    let report = orchestrator
        .on_definition_ingested(api(
            "pets",
            "1.0",
            &["prod"],
            vec![Cluster::discovery_bound("c2", DiscoveryQuery::service("pets-backend"), vec![])],
        ))
        .unwrap();
    assert_eq!(report.version_of(&Label::new("prod")), Some(SnapshotVersion::initial()));
    assert_eq!(orchestrator.watched_clusters(), ["c2"]);

    eventually(|| version_of(&orchestrator, "prod") == Some(2)).await;
    assert_eq!(
        served_endpoints(&orchestrator, "prod", "c2"),
        Some(vec![Endpoint::new("10.0.0.2", 9000), Endpoint::new("10.0.0.3", 9000)])
    );

    // The registry answers again with the same members.
    registry.touch();
    eventually(|| registry.calls() >= 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(version_of(&orchestrator, "prod"), Some(2));

    registry.set(&[("10.0.0.2", 9000)]);
    eventually(|| version_of(&orchestrator, "prod") == Some(3)).await;
    assert_eq!(
        served_endpoints(&orchestrator, "prod", "c2"),
        Some(vec![Endpoint::new("10.0.0.2", 9000)])
    );

    orchestrator.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn leaving_a_shared_label_republishes_the_rest() {
    let orchestrator = Orchestrator::builder().build();
    orchestrator
        .on_definition_ingested(api(
            "pets",
            "1.0",
            &["prod"],
            vec![Cluster::with_static_endpoints("c1", vec![Endpoint::new("10.0.0.1", 80)])],
        ))
        .unwrap();
    orchestrator
        .on_definition_ingested(api(
            "cats",
            "1.0",
            &["prod"],
            vec![Cluster::with_static_endpoints("c3", vec![Endpoint::new("10.0.0.3", 80)])],
        ))
        .unwrap();

    let prod = orchestrator.current_snapshot(&Label::new("prod")).unwrap();
    assert_eq!(prod.version(), SnapshotVersion::new(2));
    assert_eq!(prod.resources().clusters().len(), 2);

    let report = orchestrator
        .on_definition_ingested(api(
            "cats",
            "1.0",
            &["dev"],
            vec![Cluster::with_static_endpoints("c3", vec![Endpoint::new("10.0.0.3", 80)])],
        ))
        .unwrap();
    assert_eq!(report.version_of(&Label::new("prod")), Some(SnapshotVersion::new(3)));
    assert_eq!(report.version_of(&Label::new("dev")), Some(SnapshotVersion::initial()));

    let prod = orchestrator.current_snapshot(&Label::new("prod")).unwrap();
    let clusters: Vec<_> = prod.resources().clusters().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(clusters, ["c1"]);
    assert!(prod.resources().routes().iter().all(|r| r.cluster == "c1"));

    let dev = orchestrator.current_snapshot(&Label::new("dev")).unwrap();
    assert!(dev.resources().cluster("c3").is_some());
}

#[tokio::test]
async fn openapi_definition_end_to_end() {
    let registry = FakeRegistry::new(&[("10.4.0.1", 8443)]);
    let orchestrator = orchestrator_with(registry.clone());

    let definition = serde_json::json!({
        "openapi": "3.0.0",
        "info": {"title": "Inventory", "version": "v3"},
        "x-wso2-labels": ["edge"],
        "x-wso2-basePath": "/inventory",
        "x-wso2-production-endpoints": {"urls": ["consul([dc1].inventory.live, https://inventory.fallback:8443)"]},
        "x-wso2-sandbox-endpoints": {"urls": ["http://sandbox.inventory:8080"]},
        "paths": {"/items": {}, "/items/{id}": {}}
    });
    orchestrator
        .submit_definition(definition.to_string().as_bytes())
        .unwrap();

    let snapshot = orchestrator.current_snapshot(&Label::new("edge")).unwrap();
    assert!(snapshot.resources().cluster("clusterProd_Inventory_v3").is_some());
    assert!(snapshot.resources().cluster("clusterSand_Inventory_v3").is_some());
    assert_eq!(
        served_endpoints(&orchestrator, "edge", "clusterProd_Inventory_v3"),
        Some(vec![Endpoint::new("inventory.fallback", 8443)])
    );

    eventually(|| {
        served_endpoints(&orchestrator, "edge", "clusterProd_Inventory_v3")
            == Some(vec![Endpoint::new("10.4.0.1", 8443)])
    })
    .await;

    let report = orchestrator
        .remove_definition(&ApiKey::new("Inventory", "v3"))
        .unwrap();
    assert_eq!(report.removed, vec![Label::new("edge")]);
    assert!(orchestrator.watched_clusters().is_empty());
    eventually(|| registry.in_flight() == 0).await;

    orchestrator.shutdown(Duration::from_secs(1)).await;
}
