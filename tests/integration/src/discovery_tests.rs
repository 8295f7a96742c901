//! Watch coordinator behavior against a long-polling registry.

use std::time::Duration;

use apigw_adapter::prelude::*;

use crate::support::*;

fn coordinator(registry: std::sync::Arc<FakeRegistry>) -> WatchCoordinator {
    WatchCoordinator::new(registry, fast_watch_settings())
}

#[tokio::test]
async fn equal_membership_is_not_emitted_again() {
    let registry = FakeRegistry::new(&[("10.0.0.1", 80), ("10.0.0.2", 80)]);
    let coordinator = coordinator(registry.clone());
    let mut sub = coordinator
        .start_watch("c1", DiscoveryQuery::service("pets"))
        .unwrap();

    assert_eq!(sub.next().await, Some(endpoint_list(&[("10.0.0.1", 80), ("10.0.0.2", 80)])));

    // Same members, new index.
    registry.touch();
    eventually(|| registry.calls() >= 3).await;
    // Same members in a different order.
    registry.set(&[("10.0.0.2", 80), ("10.0.0.1", 80)]);
    eventually(|| registry.calls() >= 4).await;
    assert_eq!(coordinator.emissions("c1"), Some(1));

    // One member added: exactly one emission.
    registry.set(&[("10.0.0.2", 80), ("10.0.0.1", 80), ("10.0.0.3", 80)]);
    assert_eq!(sub.next().await.map(|l| l.len()), Some(3));
    eventually(|| registry.calls() >= 5).await;
    assert_eq!(coordinator.emissions("c1"), Some(2));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn stop_right_after_start_leaves_nothing_running() {
    let registry = FakeRegistry::new(&[]);
    let coordinator = coordinator(registry.clone());
    let mut sub = coordinator
        .start_watch("c1", DiscoveryQuery::service("pets"))
        .unwrap();
    assert!(coordinator.stop_watch("c1"));
    assert!(!coordinator.is_watching("c1"));
    assert!(!coordinator.stop_watch("c1"));

    // The channel closes, and stays closed.
    tokio::time::timeout(Duration::from_secs(5), async {
        while sub.next().await.is_some() {}
    })
    .await
    .unwrap();
    assert_eq!(sub.next().await, None);

    eventually(|| registry.in_flight() == 0).await;
    let calls = registry.calls();
    registry.set(&[("10.0.0.9", 80)]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.calls(), calls);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn changed_query_restarts_the_watch() {
    let registry = FakeRegistry::new(&[("10.0.0.1", 80)]);
    let coordinator = coordinator(registry.clone());

    let first = coordinator
        .start_watch("c1", DiscoveryQuery::service("pets"))
        .unwrap();
    let same = coordinator
        .start_watch("c1", DiscoveryQuery::service("pets"))
        .unwrap();
    assert_eq!(first.generation(), same.generation());

    let restarted = coordinator
        .start_watch("c1", DiscoveryQuery::service("pets").with_tag("canary"))
        .unwrap();
    assert!(restarted.generation() > first.generation());
    assert_eq!(
        coordinator.query_of("c1"),
        Some(DiscoveryQuery::service("pets").with_tag("canary"))
    );
    assert_eq!(coordinator.active_watches(), 1);

    coordinator.shutdown().await;
    eventually(|| registry.in_flight() == 0).await;
}

#[tokio::test]
async fn shutdown_refuses_new_watches() {
    let registry = FakeRegistry::new(&[("10.0.0.1", 80)]);
    let coordinator = coordinator(registry.clone());
    coordinator
        .start_watch("c1", DiscoveryQuery::service("pets"))
        .unwrap();
    coordinator
        .start_watch("c2", DiscoveryQuery::service("cats"))
        .unwrap();

    coordinator.shutdown().await;
    assert_eq!(coordinator.active_watches(), 0);
    assert!(matches!(
        coordinator.start_watch("c3", DiscoveryQuery::service("dogs")),
        Err(AdapterError::Shutdown)
    ));
    eventually(|| registry.in_flight() == 0).await;
}

#[tokio::test]
async fn orchestrator_shutdown_stops_every_watch() {
    let registry = FakeRegistry::new(&[("10.0.0.1", 80)]);
    let orchestrator = orchestrator_with(registry.clone());
    for (name, service) in [("a", "svc-a"), ("b", "svc-b")] {
        orchestrator
            .on_definition_ingested(api(
                name,
                "v1",
                &["prod"],
                vec![Cluster::discovery_bound(
                    format!("cluster-{name}"),
                    DiscoveryQuery::service(service),
                    vec![Endpoint::new("fallback", 80)],
                )],
            ))
            .unwrap();
    }
    assert_eq!(orchestrator.watched_clusters(), ["cluster-a", "cluster-b"]);

    assert!(orchestrator.shutdown(Duration::from_secs(1)).await);
    assert!(orchestrator.watched_clusters().is_empty());
    eventually(|| registry.in_flight() == 0).await;
}
