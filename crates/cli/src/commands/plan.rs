//! Offline routing plan for a recorded scenario

use anyhow::{bail, Context, Result};
use balancer_lib::{
    balancer::{BalancerConfig, Planner, ReconcileOutcome, ReconcileRequest},
    engine::LatencyNormalization,
    models::{MetricKind, UpstreamGraphEntry},
};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_percent, or_dash, print_json, print_table, print_warning, OutputFormat};

/// Everything one iteration would read from the cluster and Prometheus
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(flatten)]
    pub request: ReconcileRequest,
    #[serde(default)]
    pub upstream: Vec<UpstreamGraphEntry>,
    /// Persisted DestinationRule, absent on first rollout
    #[serde(default)]
    pub current: Option<serde_json::Value>,
    /// Tuning recorded with the scenario; flags take precedence
    #[serde(default)]
    pub config: Option<BalancerConfig>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse scenario")
    }
}

/// Tuning overrides for `plan`
#[derive(Debug, Clone, Default, Args)]
pub struct PlanOverrides {
    /// Load metric (cpu, memory, cpu_memory)
    #[arg(long)]
    pub metric_kind: Option<MetricKind>,

    /// Local-affinity floor in [0, 1]
    #[arg(long)]
    pub min_local_share: Option<f64>,

    /// Largest per-edge move per iteration, in percentage points
    #[arg(long)]
    pub step_size: Option<u32>,

    /// Dead zone around the target
    #[arg(long)]
    pub epsilon: Option<f64>,

    /// Minimum L1 change worth writing
    #[arg(long)]
    pub threshold: Option<u32>,

    /// Latency normalizer (global, per_destination)
    #[arg(long)]
    pub latency_normalization: Option<LatencyNormalization>,
}

impl PlanOverrides {
    pub fn apply(&self, base: BalancerConfig) -> Result<BalancerConfig> {
        let config = BalancerConfig {
            metric_kind: self.metric_kind.unwrap_or(base.metric_kind),
            min_local_share: self.min_local_share.unwrap_or(base.min_local_share),
            step_size: self.step_size.unwrap_or(base.step_size),
            epsilon: self.epsilon.unwrap_or(base.epsilon),
            change_threshold: self.threshold.unwrap_or(base.change_threshold),
            latency_normalization: self
                .latency_normalization
                .unwrap_or(base.latency_normalization),
        };

        if !(0.0..=1.0).contains(&config.min_local_share) {
            bail!(
                "min local share must be within [0, 1], got {}",
                config.min_local_share
            );
        }
        if config.step_size == 0 {
            bail!("step size must be positive");
        }
        if config.epsilon < 0.0 {
            bail!("epsilon must not be negative");
        }

        Ok(config)
    }
}

/// Decide what the balancer would do for a scenario
pub fn plan_scenario(scenario: &Scenario, overrides: &PlanOverrides) -> Result<ReconcileOutcome> {
    let config = overrides.apply(scenario.config.unwrap_or_default())?;
    let planner = Planner::new(config);

    Ok(planner.plan(
        &scenario.upstream,
        &scenario.request,
        scenario.current.as_ref(),
    ))
}

#[derive(Tabled)]
struct EdgeRow {
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Traffic")]
    percentage: String,
}

pub fn run(path: &Path, overrides: &PlanOverrides, format: OutputFormat) -> Result<()> {
    let scenario = Scenario::load(path)?;
    let outcome = plan_scenario(&scenario, overrides)?;

    match format {
        OutputFormat::Json => match &outcome {
            ReconcileOutcome::Applied { rule, .. } => print_json(rule)?,
            ReconcileOutcome::Skipped { .. } => print_json(&outcome)?,
        },
        OutputFormat::Table => print_outcome(&scenario.request, &outcome),
    }

    Ok(())
}

fn print_outcome(request: &ReconcileRequest, outcome: &ReconcileOutcome) {
    let target = format!("{}/{}", request.namespace, request.deployment);

    match outcome {
        ReconcileOutcome::Applied {
            service,
            mode,
            distance,
            rule,
        } => {
            println!("{}", format!("Routing plan for {}", target).bold());
            println!("{}", "=".repeat(50));
            println!("Service:   {}", service.cyan());
            println!("Mode:      {}", mode);
            println!("Distance:  {}", or_dash(*distance));
            println!();

            let rows: Vec<EdgeRow> = rule
                .distribute_map()
                .into_iter()
                .flat_map(|(from, to)| {
                    to.into_iter().map(move |(node, pct)| EdgeRow {
                        percentage: format_percent(pct, from == node),
                        from: from.clone(),
                        to: node,
                    })
                })
                .collect();
            print_table(&rows);
        }
        ReconcileOutcome::Skipped { service, reason } => {
            let subject = service.as_deref().unwrap_or(&target);
            print_warning(&format!("No change for {}: {}", subject, reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balancer_lib::balancer::{ApplyMode, SkipReason};

    const SCENARIO: &str = r#"{
        "deployment": "web",
        "namespace": "shop",
        "replicaPods": [
            {"pod": "web-a-1", "node": "node-a", "percentUsage": {"cpu": 0.7, "memory": 0.6, "combined": 1.3}},
            {"pod": "web-a-2", "node": "node-a", "percentUsage": {"cpu": 0.6, "memory": 0.5, "combined": 1.1}},
            {"pod": "web-b-1", "node": "node-b", "percentUsage": {"cpu": 0.3, "memory": 0.3, "combined": 0.6}},
            {"pod": "web-b-2", "node": "node-b", "percentUsage": {"cpu": 0.35, "memory": 0.25, "combined": 0.6}}
        ],
        "nodesLatency": [
            {"from": "node-a", "to": "node-a", "latency": 10.0},
            {"from": "node-a", "to": "node-b", "latency": 30.0},
            {"from": "node-b", "to": "node-b", "latency": 8.0},
            {"from": "node-b", "to": "node-a", "latency": 20.0}
        ],
        "clusterTopology": [
            {"node": "node-a", "zone": "zone-1", "region": "region-1"},
            {"node": "node-b", "zone": "zone-1", "region": "region-1"}
        ],
        "upstream": [
            {"node": "node-a", "destinations": [{"destinationServiceName": "web-svc", "rps": 5.0}]},
            {"node": "node-b", "destinations": [{"destinationServiceName": "web-svc", "rps": 5.0}]}
        ]
    }"#;

    fn scenario() -> Scenario {
        serde_json::from_str(SCENARIO).unwrap()
    }

    fn current_rule(a_local: u32) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "networking.istio.io/v1beta1",
            "kind": "DestinationRule",
            "metadata": {"name": "web-svc", "namespace": "shop"},
            "spec": {"trafficPolicy": {"loadBalancer": {"localityLbSetting": {"distribute": [
                {"from": "region-1/zone-1/node-a", "to": {
                    "region-1/zone-1/node-a": a_local,
                    "region-1/zone-1/node-b": 100 - a_local
                }},
                {"from": "region-1/zone-1/node-b", "to": {"region-1/zone-1/node-b": 100}}
            ]}}}}
        })
    }

    #[test]
    fn test_bootstrap_without_current_rule() {
        let outcome = plan_scenario(&scenario(), &PlanOverrides::default()).unwrap();

        let ReconcileOutcome::Applied {
            service,
            mode,
            distance,
            rule,
        } = outcome
        else {
            panic!("expected applied outcome, got {:?}", outcome);
        };
        assert_eq!(service, "web-svc");
        assert_eq!(mode, ApplyMode::Bootstrap);
        assert_eq!(distance, None);

        let distribute = rule.distribute_map();
        assert_eq!(distribute.len(), 2);
        for to in distribute.values() {
            assert_eq!(to.values().sum::<u32>(), 100);
        }
        assert!(distribute["node-a"]["node-a"] >= 35);
    }

    #[test]
    fn test_steps_from_current_rule() {
        let mut scenario = scenario();
        scenario.current = Some(current_rule(70));

        let outcome = plan_scenario(&scenario, &PlanOverrides::default()).unwrap();

        let ReconcileOutcome::Applied { mode, distance, .. } = outcome else {
            panic!("expected applied outcome, got {:?}", outcome);
        };
        assert_eq!(mode, ApplyMode::Stepped);
        assert_eq!(distance, Some(20));
    }

    #[test]
    fn test_threshold_override_skips_small_change() {
        let mut scenario = scenario();
        scenario.current = Some(current_rule(70));
        let overrides = PlanOverrides {
            threshold: Some(25),
            ..Default::default()
        };

        let outcome = plan_scenario(&scenario, &overrides).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped {
                service: Some("web-svc".to_string()),
                reason: SkipReason::InsignificantChange {
                    distance: 20,
                    threshold: 25,
                },
            }
        );
    }

    #[test]
    fn test_scenario_config_with_flag_precedence() {
        let mut scenario = scenario();
        scenario.config = Some(BalancerConfig {
            step_size: 2,
            change_threshold: 4,
            ..Default::default()
        });
        let overrides = PlanOverrides {
            step_size: Some(10),
            ..Default::default()
        };

        let config = overrides.apply(scenario.config.unwrap()).unwrap();

        assert_eq!(config.step_size, 10);
        assert_eq!(config.change_threshold, 4);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = PlanOverrides {
            min_local_share: Some(1.5),
            ..Default::default()
        };
        assert!(plan_scenario(&scenario(), &overrides).is_err());
    }

    #[test]
    fn test_empty_upstream_skips() {
        let mut scenario = scenario();
        scenario.upstream.clear();

        let outcome = plan_scenario(&scenario, &PlanOverrides::default()).unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Skipped {
                service: None,
                reason: SkipReason::NoTraffic,
            }
        );
    }
}
