//! Properties that hold across any sequence of updates.

use std::sync::Arc;

use apigw_adapter::prelude::*;

use crate::support::*;

fn static_cluster(name: &str, host: &str) -> Cluster {
    Cluster::with_static_endpoints(name, vec![Endpoint::new(host, 80)])
}

/// Every route of every served snapshot points at a cluster of the same snapshot.
fn assert_consistent(orchestrator: &Orchestrator) {
    for (label, snapshot) in orchestrator.cache().iter() {
        let resources = snapshot.resources();
        for route in resources.routes() {
            assert!(
                resources.cluster(&route.cluster).is_some(),
                "label {label} v{} routes to missing cluster {}",
                snapshot.version(),
                route.cluster
            );
        }
        for cluster in resources.clusters() {
            if cluster.is_discovery_bound() {
                assert!(cluster.load_assignment.is_some());
            }
        }
    }
}

#[tokio::test]
async fn byte_identical_submission_publishes_once() {
    let orchestrator = Orchestrator::builder().build();
    let definition = serde_json::json!({
        "info": {"title": "pets", "version": "1.0"},
        "x-wso2-labels": ["prod", "dev"],
        "x-wso2-production-endpoints": {"urls": ["http://10.0.0.1:80"]},
        "paths": {"/pets": {}}
    })
    .to_string();

    let first = orchestrator.submit_definition(definition.as_bytes()).unwrap();
    assert_eq!(first.published.len(), 2);

    let second = orchestrator.submit_definition(definition.as_bytes()).unwrap();
    assert!(!second.changed);
    assert!(second.published.is_empty());
    assert_eq!(orchestrator.cache().stats().commits(), 2);
}

#[test]
fn versions_are_gapless_per_label_under_concurrency() {
    const LABELS: usize = 4;
    const UPDATES: usize = 50;

    let orchestrator = Orchestrator::builder().build();
    for i in 0..LABELS {
        let label = format!("label{i}");
        orchestrator
            .on_definition_ingested(api(
                &format!("api{i}"),
                "v1",
                &[label.as_str()],
                vec![Cluster::discovery_bound(
                    format!("cluster{i}"),
                    DiscoveryQuery::service(format!("svc{i}")),
                    vec![],
                )],
            ))
            .unwrap();
    }

    std::thread::scope(|scope| {
        for i in 0..LABELS {
            let orchestrator = orchestrator.clone();
            scope.spawn(move || {
                let label = Label::new(format!("label{i}"));
                let cluster = format!("cluster{i}");
                let mut versions = Vec::with_capacity(UPDATES);
                for n in 0..UPDATES {
                    let host = format!("10.{i}.0.{n}");
                    let report = orchestrator.on_discovery_update(&cluster, endpoint_list(&[(host.as_str(), 80)]));
                    versions.push(report.version_of(&label).unwrap().as_u64());
                }
                let expected: Vec<u64> = (2..=(UPDATES as u64 + 1)).collect();
                assert_eq!(versions, expected);
            });
        }
    });

    for i in 0..LABELS {
        assert_eq!(version_of(&orchestrator, &format!("label{i}")), Some(UPDATES as u64 + 1));
    }
}

#[test]
fn readers_never_see_a_version_go_backwards() {
    let orchestrator = Orchestrator::builder().build();
    orchestrator
        .on_definition_ingested(api(
            "pets",
            "v1",
            &["prod"],
            vec![Cluster::discovery_bound("c1", DiscoveryQuery::service("pets"), vec![])],
        ))
        .unwrap();

    let cache = Arc::clone(orchestrator.cache());
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for n in 0..200 {
                let host = format!("10.0.{}.{}", n / 256, n % 256);
                orchestrator.on_discovery_update("c1", endpoint_list(&[(host.as_str(), 80)]));
            }
        });
        scope.spawn(|| {
            let label = Label::new("prod");
            let mut last = 0;
            for _ in 0..2_000 {
                let version = cache.current_snapshot(&label).map(|s| s.version().as_u64()).unwrap_or(0);
                assert!(version >= last);
                last = version;
            }
        });
    });
}

#[tokio::test]
async fn served_snapshots_stay_consistent() {
    let orchestrator = Orchestrator::builder().build();

    orchestrator
        .on_definition_ingested(api("a", "v1", &["prod"], vec![static_cluster("ca", "10.0.0.1")]))
        .unwrap();
    assert_consistent(&orchestrator);

    orchestrator
        .on_definition_ingested(api(
            "b",
            "v1",
            &["prod", "dev"],
            vec![
                static_cluster("cb", "10.0.0.2"),
                Cluster::discovery_bound("cd", DiscoveryQuery::service("d"), vec![]),
            ],
        ))
        .unwrap();
    assert_consistent(&orchestrator);

    // A route to a cluster nobody defines: rejected, previous snapshots kept.
    let mut broken = api("c", "v1", &["prod"], vec![static_cluster("cc", "10.0.0.3")]);
    broken.production.clusters.clear();
    broken.content["clusters"] = serde_json::Value::Array(Vec::new());
    let report = orchestrator.on_definition_ingested(broken).unwrap();
    assert_eq!(report.rejected, vec![Label::new("prod")]);
    assert_eq!(version_of(&orchestrator, "prod"), Some(2));
    assert_consistent(&orchestrator);

    // Fixing the definition publishes the next version without a gap.
    let report = orchestrator
        .on_definition_ingested(api("c", "v1", &["prod"], vec![static_cluster("cc", "10.0.0.3")]))
        .unwrap();
    assert_eq!(report.version_of(&Label::new("prod")), Some(SnapshotVersion::new(3)));
    assert_consistent(&orchestrator);

    orchestrator.on_discovery_update("cd", endpoint_list(&[("10.0.0.4", 80)]));
    orchestrator.remove_definition(&ApiKey::new("a", "v1")).unwrap();
    assert_consistent(&orchestrator);
    assert_eq!(orchestrator.cache().stats().rejected_commits(), 1);
}

#[tokio::test]
async fn subscribers_receive_every_commit_in_order() {
    let orchestrator = Orchestrator::builder().build();
    let mut watch = orchestrator.cache().subscribe(Label::new("prod"));

    orchestrator
        .on_definition_ingested(api("a", "v1", &["prod"], vec![static_cluster("ca", "10.0.0.1")]))
        .unwrap();
    orchestrator
        .on_definition_ingested(api("b", "v1", &["prod"], vec![static_cluster("cb", "10.0.0.2")]))
        .unwrap();

    let first = watch.recv().await.unwrap();
    let second = watch.recv().await.unwrap();
    assert_eq!(first.version(), SnapshotVersion::initial());
    assert_eq!(second.version(), SnapshotVersion::new(2));
    assert_eq!(second.resources().clusters().len(), 2);
}

#[tokio::test]
async fn removed_label_keeps_counting_from_its_last_version() {
    let orchestrator = Orchestrator::builder().build();
    let definition = |host: &str| api("a", "v1", &["prod"], vec![static_cluster("ca", host)]);

    orchestrator.on_definition_ingested(definition("10.0.0.1")).unwrap();
    orchestrator.on_definition_ingested(definition("10.0.0.2")).unwrap();
    orchestrator.remove_definition(&ApiKey::new("a", "v1")).unwrap();
    assert_eq!(version_of(&orchestrator, "prod"), None);

    orchestrator.on_definition_ingested(definition("10.0.0.3")).unwrap();
    assert_eq!(version_of(&orchestrator, "prod"), Some(3));
}
