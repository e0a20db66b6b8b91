//! Tests for reconcile decisions
//!
//! These tests verify:
//! - Bootstrap writes the target when no rule exists
//! - A persisted rule is stepped and gated by the change threshold
//! - Skips for missing traffic or destination
//! - Collaborator failures surface as errors without a write

use super::*;
use crate::mapper::{GROUP, PLURAL, VERSION};
use crate::models::{Destination, PercentUsage};
use crate::testing::{MockCluster, MockMetrics};

fn make_pod(pod: &str, node: &str, cpu: f64, memory: f64) -> PodMetric {
    PodMetric {
        pod: pod.to_string(),
        node: node.to_string(),
        usage: Default::default(),
        percent_usage: PercentUsage {
            cpu,
            memory,
            combined: cpu + memory,
        },
        requested: Default::default(),
        limits: Default::default(),
    }
}

fn latency(from: &str, to: &str, latency: f64) -> LatencyEdge {
    LatencyEdge {
        from: from.to_string(),
        to: to.to_string(),
        latency,
    }
}

fn topology() -> Vec<ClusterTopology> {
    ["node-a", "node-b"]
        .iter()
        .map(|node| ClusterTopology {
            node: node.to_string(),
            zone: "zone-1".to_string(),
            region: "region-1".to_string(),
        })
        .collect()
}

fn request() -> ReconcileRequest {
    ReconcileRequest {
        deployment: "web".to_string(),
        namespace: "shop".to_string(),
        replica_pods: vec![
            make_pod("web-a-1", "node-a", 0.7, 0.6),
            make_pod("web-a-2", "node-a", 0.6, 0.5),
            make_pod("web-b-1", "node-b", 0.3, 0.3),
            make_pod("web-b-2", "node-b", 0.35, 0.25),
        ],
        nodes_latency: vec![
            latency("node-a", "node-a", 10.0),
            latency("node-a", "node-b", 30.0),
            latency("node-b", "node-b", 8.0),
            latency("node-b", "node-a", 20.0),
        ],
        cluster_topology: topology(),
    }
}

fn upstream(service: &str) -> Vec<UpstreamGraphEntry> {
    ["node-a", "node-b"]
        .iter()
        .map(|node| UpstreamGraphEntry {
            node: node.to_string(),
            destinations: vec![Destination {
                destination_service_name: service.to_string(),
                rps: 5.0,
            }],
        })
        .collect()
}

fn distribute(entries: &[(&str, &[(&str, u32)])]) -> DistributeMap {
    entries
        .iter()
        .map(|(from, to)| {
            (
                from.to_string(),
                to.iter().map(|(n, p)| (n.to_string(), *p)).collect(),
            )
        })
        .collect()
}

/// Persisted DestinationRule document holding `current`
fn persisted(current: &DistributeMap) -> serde_json::Value {
    let rule = to_destination_rule(
        &distribute_to_percent_list(current),
        "shop",
        "web-svc",
        &topology(),
    );
    serde_json::to_value(rule).unwrap()
}

fn balancer(cluster: Arc<MockCluster>, metrics: Arc<MockMetrics>) -> OptiBalancer {
    OptiBalancer::new(cluster, metrics, BalancerConfig::default())
}

#[test]
fn test_balancer_config_defaults() {
    let config = BalancerConfig::default();

    assert_eq!(config.metric_kind, MetricKind::CpuMemory);
    assert_eq!(config.min_local_share, 0.35);
    assert_eq!(config.step_size, 5);
    assert_eq!(config.epsilon, 1.0);
    assert_eq!(config.change_threshold, 10);
    assert_eq!(config.latency_normalization, LatencyNormalization::Global);
}

#[test]
fn test_planner_target_resolves_service_and_distribution() {
    let planner = Planner::default();

    let target = planner.target(&upstream("web-svc"), &request()).unwrap();

    assert_eq!(target.service, "web-svc");
    assert_eq!(target.distribute["node-a"]["node-a"], 35);
    assert_eq!(target.distribute["node-a"]["node-b"], 65);
    assert_eq!(target.distribute["node-b"]["node-a"], 19);
    assert_eq!(target.distribute["node-b"]["node-b"], 81);
}

#[test]
fn test_planner_skips_without_traffic() {
    let planner = Planner::default();

    assert_eq!(planner.target(&[], &request()), Err(SkipReason::NoTraffic));

    let no_pods = ReconcileRequest {
        replica_pods: vec![],
        ..request()
    };
    assert_eq!(
        planner.target(&upstream("web-svc"), &no_pods),
        Err(SkipReason::NoTraffic)
    );
}

#[test]
fn test_planner_skips_without_destination() {
    let planner = Planner::default();
    let mut graph = upstream("web-svc");
    graph[0].destinations.clear();

    assert_eq!(
        planner.target(&graph, &request()),
        Err(SkipReason::NoDestination)
    );
}

#[test]
fn test_planner_next_bootstraps_without_distribute() {
    let planner = Planner::default();
    let target = distribute(&[("node-a", &[("node-a", 100)])]);
    let bare = serde_json::json!({ "spec": { "host": "web-svc.shop.svc.cluster.local" } });

    for state in [None, Some(&bare)] {
        let step = planner.next(&target, state).unwrap();
        assert_eq!(step.mode, ApplyMode::Bootstrap);
        assert_eq!(step.distance, None);
        assert_eq!(step.distribute, target);
    }
}

#[test]
fn test_planner_next_steps_toward_target() {
    let planner = Planner::default();
    let current = distribute(&[
        ("node-a", &[("node-a", 70), ("node-b", 30)]),
        ("node-b", &[("node-b", 100)]),
    ]);
    let target = distribute(&[
        ("node-a", &[("node-a", 35), ("node-b", 65)]),
        ("node-b", &[("node-a", 19), ("node-b", 81)]),
    ]);

    let step = planner.next(&target, Some(&persisted(&current))).unwrap();

    assert_eq!(step.mode, ApplyMode::Stepped);
    assert_eq!(step.distance, Some(20));
    assert_eq!(
        step.distribute,
        distribute(&[
            ("node-a", &[("node-a", 65), ("node-b", 35)]),
            ("node-b", &[("node-a", 5), ("node-b", 95)]),
        ])
    );
}

#[test]
fn test_planner_next_gates_small_changes() {
    let planner = Planner::default();
    let current = distribute(&[
        ("node-a", &[("node-a", 37), ("node-b", 63)]),
        ("node-b", &[("node-a", 19), ("node-b", 81)]),
    ]);
    let target = distribute(&[
        ("node-a", &[("node-a", 35), ("node-b", 65)]),
        ("node-b", &[("node-a", 19), ("node-b", 81)]),
    ]);

    let result = planner.next(&target, Some(&persisted(&current)));

    assert_eq!(
        result,
        Err(SkipReason::InsignificantChange {
            distance: 4,
            threshold: 10
        })
    );
}

#[test]
fn test_planner_threshold_is_configurable() {
    let planner = Planner::new(BalancerConfig {
        change_threshold: 4,
        ..BalancerConfig::default()
    });
    let current = distribute(&[("node-a", &[("node-a", 37), ("node-b", 63)])]);
    let target = distribute(&[("node-a", &[("node-a", 35), ("node-b", 65)])]);

    let step = planner.next(&target, Some(&persisted(&current))).unwrap();

    assert_eq!(step.distance, Some(4));
}

#[test]
fn test_planner_next_handles_oversized_persisted_weights() {
    let planner = Planner::default();
    let state = serde_json::json!({
        "spec": { "trafficPolicy": { "loadBalancer": { "localityLbSetting": {
            "distribute": [
                { "from": "r/z/node-a", "to": { "r/z/node-a": 3.0e9, "r/z/node-b": 3.0e9 } }
            ]
        }}}}
    });
    let target = distribute(&[("node-a", &[("node-a", 50), ("node-b", 50)])]);

    let step = planner.next(&target, Some(&state)).unwrap();

    assert_eq!(step.mode, ApplyMode::Stepped);
    assert_eq!(step.distribute, target);
    assert_eq!(step.distance, Some(u32::MAX));
}

#[test]
fn test_plan_offline_bootstrap_rule() {
    let planner = Planner::default();

    let outcome = planner.plan(&upstream("web-svc"), &request(), None);

    let ReconcileOutcome::Applied {
        service,
        mode,
        distance,
        rule,
    } = outcome
    else {
        panic!("expected applied outcome");
    };
    assert_eq!(service, "web-svc");
    assert_eq!(mode, ApplyMode::Bootstrap);
    assert_eq!(distance, None);
    assert_eq!(rule.spec.host, "web-svc.shop.svc.cluster.local");
    assert_eq!(rule.distribute_map()["node-a"]["node-b"], 65);
}

#[test]
fn test_outcome_serialization() {
    let skipped = ReconcileOutcome::Skipped {
        service: Some("web-svc".to_string()),
        reason: SkipReason::InsignificantChange {
            distance: 4,
            threshold: 10,
        },
    };

    let json = serde_json::to_value(&skipped).unwrap();

    assert_eq!(json["outcome"], "skipped");
    assert_eq!(json["reason"], "insignificant_change");
    assert_eq!(json["distance"], 4);
    assert_eq!(json["service"], "web-svc");
}

#[tokio::test]
async fn test_execute_bootstraps_when_rule_missing() {
    let cluster = Arc::new(MockCluster::new());
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));

    let outcome = balancer(cluster.clone(), metrics)
        .execute(&request())
        .await
        .unwrap();

    assert!(outcome.is_applied());
    let applied = cluster.applied();
    assert_eq!(applied.len(), 1);

    let rule = &applied[0];
    assert_eq!(rule.metadata.name, "web-svc");
    assert_eq!(rule.metadata.namespace, "shop");
    let distribute = &rule.spec.traffic_policy.load_balancer.locality_lb_setting.distribute;
    assert_eq!(distribute.len(), 2);
    assert_eq!(distribute[0].from, "region-1/zone-1/node-a");
    assert_eq!(distribute[0].to["region-1/zone-1/node-a"], 35);
    assert_eq!(distribute[0].to["region-1/zone-1/node-b"], 65);
}

#[tokio::test]
async fn test_execute_reads_destination_rule_reference() {
    let cluster = Arc::new(MockCluster::new());
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));

    balancer(cluster.clone(), metrics)
        .execute(&request())
        .await
        .unwrap();

    let reads = cluster.reads();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].group, GROUP);
    assert_eq!(reads[0].version, VERSION);
    assert_eq!(reads[0].plural, PLURAL);
    assert_eq!(reads[0].namespace, "shop");
    assert_eq!(reads[0].name, "web-svc");
}

#[tokio::test]
async fn test_execute_steps_existing_rule() {
    let current = distribute(&[
        ("node-a", &[("node-a", 70), ("node-b", 30)]),
        ("node-b", &[("node-b", 100)]),
    ]);
    let cluster = Arc::new(MockCluster::new().with_state(persisted(&current)));
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));

    let outcome = balancer(cluster.clone(), metrics)
        .execute(&request())
        .await
        .unwrap();

    match outcome {
        ReconcileOutcome::Applied { mode, distance, .. } => {
            assert_eq!(mode, ApplyMode::Stepped);
            assert_eq!(distance, Some(20));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let written = cluster.applied()[0].distribute_map();
    assert_eq!(written["node-a"]["node-a"], 65);
    assert_eq!(written["node-b"]["node-a"], 5);
}

#[tokio::test]
async fn test_execute_skips_insignificant_change_without_write() {
    let current = distribute(&[
        ("node-a", &[("node-a", 37), ("node-b", 63)]),
        ("node-b", &[("node-a", 19), ("node-b", 81)]),
    ]);
    let cluster = Arc::new(MockCluster::new().with_state(persisted(&current)));
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));

    let outcome = balancer(cluster.clone(), metrics)
        .execute(&request())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Skipped {
            service: Some("web-svc".to_string()),
            reason: SkipReason::InsignificantChange {
                distance: 4,
                threshold: 10
            },
        }
    );
    assert!(cluster.applied().is_empty());
}

#[tokio::test]
async fn test_execute_converges_over_iterations() {
    let current = distribute(&[
        ("node-a", &[("node-a", 90), ("node-b", 10)]),
        ("node-b", &[("node-b", 100)]),
    ]);
    let cluster = Arc::new(MockCluster::new().with_state(persisted(&current)));
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));
    let balancer = balancer(cluster.clone(), metrics);

    let mut last = None;
    for _ in 0..30 {
        last = Some(balancer.execute(&request()).await.unwrap());
    }

    // Eventually every step falls under the threshold
    assert!(matches!(
        last,
        Some(ReconcileOutcome::Skipped {
            reason: SkipReason::InsignificantChange { .. },
            ..
        })
    ));
    let applied = cluster.applied();
    let written = applied.last().unwrap().distribute_map();
    assert!(written["node-a"]["node-a"] <= 45);
    assert!(written["node-b"]["node-a"] >= 10);
}

#[tokio::test]
async fn test_execute_skips_empty_upstream() {
    let cluster = Arc::new(MockCluster::new());
    let metrics = Arc::new(MockMetrics::new());

    let outcome = balancer(cluster.clone(), metrics)
        .execute(&request())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Skipped {
            service: None,
            reason: SkipReason::NoTraffic,
        }
    );
    assert!(cluster.reads().is_empty());
    assert!(cluster.applied().is_empty());
}

#[tokio::test]
async fn test_execute_metrics_failure_is_error() {
    let cluster = Arc::new(MockCluster::new());
    let metrics = Arc::new(MockMetrics::new().failing());

    let result = balancer(cluster.clone(), metrics).execute(&request()).await;

    assert!(matches!(result, Err(ReconcileError::Metrics(_))));
    assert!(cluster.applied().is_empty());
}

#[tokio::test]
async fn test_execute_read_failure_is_error() {
    let cluster = Arc::new(MockCluster::new().failing_reads());
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));

    let result = balancer(cluster.clone(), metrics).execute(&request()).await;

    assert!(matches!(result, Err(ReconcileError::ClusterState(_))));
    assert!(cluster.applied().is_empty());
}

#[tokio::test]
async fn test_execute_apply_failure_is_error() {
    let cluster = Arc::new(MockCluster::new().failing_applies());
    let metrics = Arc::new(MockMetrics::new().with_upstream(upstream("web-svc")));

    let result = balancer(cluster, metrics).execute(&request()).await;

    let err = result.unwrap_err();
    assert_eq!(err.component(), "cluster_state");
    assert!(err.to_string().contains("forbidden"));
}
