//! Reconciliation of routing state
//!
//! One `execute` call is one iteration for a (deployment, namespace):
//! compute a target distribution, read the persisted DestinationRule, step
//! toward the target and write only when the change is significant.
//!
//! The decision logic lives in [`Planner`] and is free of I/O so the CLI
//! can run it offline; [`OptiBalancer`] wires it to the collaborators.

mod registry;
mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{LoopConfig, ReconcileLoop, ReconcileLoopBuilder, Target};
pub use registry::{TargetRegistry, TargetStatus};

use crate::adapters::{ClusterState, MetricsSource};
use crate::engine::{
    distribute_to_percent_list, l1_distance, percent_list_to_distribute, step_toward_target,
    EngineConfig, LatencyNormalization, TrafficEngine, DEFAULT_CHANGE_THRESHOLD,
    DEFAULT_EPSILON, DEFAULT_MIN_LOCAL_SHARE, DEFAULT_STEP_SIZE,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::mapper::{distribute_from_state, to_destination_rule, DestinationRule, RoutingStateRef};
use crate::models::{
    ClusterTopology, DistributeMap, LatencyEdge, MetricKind, PodMetric, UpstreamGraphEntry,
};
use crate::observability::StructuredLogger;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Tuning for one balancer instance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub metric_kind: MetricKind,
    /// Local-affinity floor (default: 0.35)
    pub min_local_share: f64,
    /// Largest per-edge move per iteration, in percentage points (default: 5)
    pub step_size: u32,
    /// Dead zone around the target (default: 1.0)
    pub epsilon: f64,
    /// Minimum L1 change worth writing (default: 10)
    pub change_threshold: u32,
    pub latency_normalization: LatencyNormalization,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            metric_kind: MetricKind::default(),
            min_local_share: DEFAULT_MIN_LOCAL_SHARE,
            step_size: DEFAULT_STEP_SIZE,
            epsilon: DEFAULT_EPSILON,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            latency_normalization: LatencyNormalization::default(),
        }
    }
}

impl BalancerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            metric_kind: self.metric_kind,
            min_local_share: self.min_local_share,
            latency_normalization: self.latency_normalization,
        }
    }
}

/// Inputs for one iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub deployment: String,
    pub namespace: String,
    #[serde(default)]
    pub replica_pods: Vec<PodMetric>,
    #[serde(default)]
    pub nodes_latency: Vec<LatencyEdge>,
    #[serde(default)]
    pub cluster_topology: Vec<ClusterTopology>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// No usable persisted state; the target was written as-is
    Bootstrap,
    /// The persisted state was moved one step toward the target
    Stepped,
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyMode::Bootstrap => write!(f, "bootstrap"),
            ApplyMode::Stepped => write!(f, "stepped"),
        }
    }
}

/// Why an iteration ended without a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No upstream traffic, or nothing routable after scoring
    NoTraffic,
    /// Upstream traffic names no destination service
    NoDestination,
    InsignificantChange { distance: u32, threshold: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoTraffic => write!(f, "no traffic"),
            SkipReason::NoDestination => write!(f, "no destination service"),
            SkipReason::InsignificantChange {
                distance,
                threshold,
            } => write!(f, "insignificant change ({} < {})", distance, threshold),
        }
    }
}

/// Result of one iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        service: String,
        mode: ApplyMode,
        /// L1 change written; `None` on bootstrap
        distance: Option<u32>,
        rule: DestinationRule,
    },
    Skipped {
        service: Option<String>,
        #[serde(flatten)]
        reason: SkipReason,
    },
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Target distribution for a destination service
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDistribution {
    pub service: String,
    pub distribute: DistributeMap,
}

/// Next distribution to write
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub mode: ApplyMode,
    pub distance: Option<u32>,
    pub distribute: DistributeMap,
}

/// Pure decision logic of an iteration
#[derive(Debug, Clone, Default)]
pub struct Planner {
    engine: TrafficEngine,
    config: BalancerConfig,
}

impl Planner {
    pub fn new(config: BalancerConfig) -> Self {
        Self {
            engine: TrafficEngine::new(config.engine_config()),
            config,
        }
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Compute the target and resolve the destination service
    pub fn target(
        &self,
        upstream: &[UpstreamGraphEntry],
        request: &ReconcileRequest,
    ) -> Result<TargetDistribution, SkipReason> {
        if upstream.is_empty() {
            return Err(SkipReason::NoTraffic);
        }

        let percents = self.engine.calculate_traffic(
            &request.replica_pods,
            upstream,
            &request.nodes_latency,
        );
        if percents.is_empty() {
            return Err(SkipReason::NoTraffic);
        }

        let service = upstream
            .first()
            .and_then(|entry| entry.destinations.first())
            .map(|d| d.destination_service_name.clone())
            .filter(|name| !name.is_empty())
            .ok_or(SkipReason::NoDestination)?;

        Ok(TargetDistribution {
            service,
            distribute: percent_list_to_distribute(&percents),
        })
    }

    /// Decide the next distribution given the persisted routing state
    pub fn next(
        &self,
        target: &DistributeMap,
        state: Option<&serde_json::Value>,
    ) -> Result<Step, SkipReason> {
        let Some(current) = state.and_then(distribute_from_state) else {
            return Ok(Step {
                mode: ApplyMode::Bootstrap,
                distance: None,
                distribute: target.clone(),
            });
        };

        let next = step_toward_target(
            &current,
            target,
            self.config.step_size,
            self.config.epsilon,
        );
        let distance = l1_distance(&current, &next);
        debug!(
            distance = distance,
            threshold = self.config.change_threshold,
            "Stepped toward target"
        );

        if distance < self.config.change_threshold {
            return Err(SkipReason::InsignificantChange {
                distance,
                threshold: self.config.change_threshold,
            });
        }

        Ok(Step {
            mode: ApplyMode::Stepped,
            distance: Some(distance),
            distribute: next,
        })
    }

    /// Full decision without I/O: upstream and persisted state are given.
    pub fn plan(
        &self,
        upstream: &[UpstreamGraphEntry],
        request: &ReconcileRequest,
        state: Option<&serde_json::Value>,
    ) -> ReconcileOutcome {
        let target = match self.target(upstream, request) {
            Ok(target) => target,
            Err(reason) => {
                return ReconcileOutcome::Skipped {
                    service: None,
                    reason,
                }
            }
        };

        match self.next(&target.distribute, state) {
            Ok(step) => ReconcileOutcome::Applied {
                rule: rule_for(&target.service, &step.distribute, request),
                service: target.service,
                mode: step.mode,
                distance: step.distance,
            },
            Err(reason) => ReconcileOutcome::Skipped {
                service: Some(target.service),
                reason,
            },
        }
    }
}

fn rule_for(
    service: &str,
    distribute: &DistributeMap,
    request: &ReconcileRequest,
) -> DestinationRule {
    to_destination_rule(
        &distribute_to_percent_list(distribute),
        &request.namespace,
        service,
        &request.cluster_topology,
    )
}

/// Orchestrates one reconcile iteration against live collaborators
pub struct OptiBalancer {
    cluster: Arc<dyn ClusterState>,
    metrics: Arc<dyn MetricsSource>,
    planner: Planner,
    logger: StructuredLogger,
}

impl OptiBalancer {
    pub fn new(
        cluster: Arc<dyn ClusterState>,
        metrics: Arc<dyn MetricsSource>,
        config: BalancerConfig,
    ) -> Self {
        Self {
            cluster,
            metrics,
            planner: Planner::new(config),
            logger: StructuredLogger::new("opti-balancer"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        self.planner.config()
    }

    /// Run one iteration.
    ///
    /// Skips are returned as outcomes; a failed collaborator call aborts the
    /// iteration without retry.
    pub async fn execute(
        &self,
        request: &ReconcileRequest,
    ) -> ReconcileResult<ReconcileOutcome> {
        let upstream = self
            .metrics
            .upstream_graph(&request.deployment, &request.namespace)
            .await
            .map_err(ReconcileError::Metrics)?;

        let target = match self.planner.target(&upstream, request) {
            Ok(target) => target,
            Err(reason) => return Ok(self.skipped(request, None, reason)),
        };

        let reference = RoutingStateRef::destination_rule(&request.namespace, &target.service);
        let state = self
            .cluster
            .read_routing_state(&reference)
            .await
            .map_err(ReconcileError::ClusterState)?;

        let step = match self.planner.next(&target.distribute, state.as_ref()) {
            Ok(step) => step,
            Err(reason) => return Ok(self.skipped(request, Some(target.service), reason)),
        };

        let rule = rule_for(&target.service, &step.distribute, request);
        self.cluster
            .apply_routing_state(&rule)
            .await
            .map_err(ReconcileError::ClusterState)?;

        self.logger.log_routing_applied(
            &request.namespace,
            &target.service,
            &step.mode.to_string(),
            step.distance,
            step.distribute.len(),
        );

        Ok(ReconcileOutcome::Applied {
            service: target.service,
            mode: step.mode,
            distance: step.distance,
            rule,
        })
    }

    fn skipped(
        &self,
        request: &ReconcileRequest,
        service: Option<String>,
        reason: SkipReason,
    ) -> ReconcileOutcome {
        self.logger.log_routing_skipped(
            &request.namespace,
            &request.deployment,
            &reason.to_string(),
        );
        ReconcileOutcome::Skipped { service, reason }
    }
}
