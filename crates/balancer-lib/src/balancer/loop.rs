//! Reconcile loop
//!
//! Periodically reconciles every configured target. Targets are processed
//! one after another inside a tick so a destination service never has two
//! iterations in flight.

use super::{BalancerConfig, OptiBalancer, ReconcileOutcome, ReconcileRequest, TargetRegistry};
use crate::adapters::{
    backfill_pods, BackfillConfig, BackfillOutcome, ClusterState, MetricsSource,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::health::{components, HealthRegistry};
use crate::observability::{BalancerMetrics, StructuredLogger};
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// A deployment under reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub namespace: String,
    pub deployment: String,
}

impl Target {
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
        }
    }

    /// Parse a comma-separated `namespace/deployment` list, ignoring blanks
    pub fn parse_list(list: &str) -> Result<Vec<Target>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Target::from_str)
            .collect()
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let valid = |part: &str| !part.is_empty() && !part.contains('/');
        match s.split_once('/') {
            Some((ns, deploy)) if valid(ns) && valid(deploy) => Ok(Target::new(ns, deploy)),
            _ => bail!("Invalid target '{}', expected namespace/deployment", s),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.deployment)
    }
}

/// Configuration for the reconcile loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Time between ticks (default: 30 seconds)
    pub interval: Duration,
    /// Maximum jitter added to the interval (default: 2 seconds)
    pub jitter: Duration,
    pub backfill: BackfillConfig,
    pub balancer: BalancerConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(2),
            backfill: BackfillConfig::default(),
            balancer: BalancerConfig::default(),
        }
    }
}

/// Counts from one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Runs `OptiBalancer::execute` for every target on a fixed cadence
pub struct ReconcileLoop {
    balancer: OptiBalancer,
    cluster: Arc<dyn ClusterState>,
    metrics_source: Arc<dyn MetricsSource>,
    targets: Vec<Target>,
    registry: Arc<TargetRegistry>,
    health: HealthRegistry,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
    config: LoopConfig,
}

impl ReconcileLoop {
    #[allow(clippy::too_many_arguments)]
    fn new(
        cluster: Arc<dyn ClusterState>,
        metrics_source: Arc<dyn MetricsSource>,
        targets: Vec<Target>,
        registry: Arc<TargetRegistry>,
        health: HealthRegistry,
        logger: StructuredLogger,
        config: LoopConfig,
    ) -> Self {
        for target in &targets {
            registry.register(&target.namespace, &target.deployment);
        }

        let metrics = BalancerMetrics::new();
        metrics.set_targets_configured(targets.len() as i64);

        let balancer = OptiBalancer::new(cluster.clone(), metrics_source.clone(), config.balancer)
            .with_logger(logger.clone());

        Self {
            balancer,
            cluster,
            metrics_source,
            targets,
            registry,
            health,
            metrics,
            logger,
            config,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            targets = self.targets.len(),
            "Starting reconcile loop"
        );

        // First tick fires immediately
        let mut ticker = interval(self.current_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let summary = self.run_once().await;

                    debug!(
                        applied = summary.applied,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Reconcile tick complete"
                    );

                    ticker = self.next_ticker();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down reconcile loop");
                    break;
                }
            }
        }
    }

    /// Ticker for the next tick with freshly drawn jitter
    fn next_ticker(&self) -> Interval {
        let period = self.current_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn current_interval(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }

    /// Reconcile every target once, sequentially
    pub async fn run_once(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        let mut metrics_error = None;
        let mut cluster_error = None;

        for target in &self.targets {
            let start = Instant::now();
            let result = self.reconcile_target(target).await;
            self.metrics
                .observe_reconcile_latency(start.elapsed().as_secs_f64());

            match result {
                Ok((outcome, dropped)) => {
                    match &outcome {
                        ReconcileOutcome::Applied {
                            service, distance, ..
                        } => {
                            summary.applied += 1;
                            self.metrics.set_routing_distance(
                                &target.namespace,
                                service,
                                distance.unwrap_or(0),
                            );
                        }
                        ReconcileOutcome::Skipped { .. } => summary.skipped += 1,
                    }
                    self.metrics.inc_iteration(outcome.label());
                    self.registry.record_outcome(
                        &target.namespace,
                        &target.deployment,
                        &outcome,
                        dropped,
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    let message = e.to_string();
                    self.metrics.inc_iteration("failed");
                    self.logger
                        .log_reconcile_failed(&target.namespace, &target.deployment, &message);
                    self.registry
                        .record_failure(&target.namespace, &target.deployment, &message);
                    match e {
                        ReconcileError::Metrics(_) => metrics_error = Some(message),
                        ReconcileError::ClusterState(_) => cluster_error = Some(message),
                    }
                }
            }
        }

        self.report_health(&summary, metrics_error, cluster_error).await;
        summary
    }

    /// Gather inputs for one target and execute an iteration.
    ///
    /// Returns the outcome and the number of pods dropped by backfill.
    async fn reconcile_target(
        &self,
        target: &Target,
    ) -> ReconcileResult<(ReconcileOutcome, usize)> {
        let samples = self
            .cluster
            .replica_pods(&target.deployment, &target.namespace)
            .await
            .map_err(ReconcileError::ClusterState)?;

        let outcomes = backfill_pods(
            self.metrics_source.as_ref(),
            samples,
            &target.namespace,
            &self.config.backfill,
        )
        .await
        .map_err(ReconcileError::Metrics)?;

        let mut replica_pods = Vec::with_capacity(outcomes.len());
        let mut dropped = 0usize;
        for outcome in outcomes {
            match outcome {
                BackfillOutcome::Ready(pod) => replica_pods.push(pod),
                BackfillOutcome::Dropped { pod, reason } => {
                    dropped += 1;
                    self.logger.log_pod_dropped(&target.namespace, &pod, &reason);
                }
            }
        }
        if dropped > 0 {
            self.metrics.add_pods_dropped(dropped as u64);
        }

        let nodes_latency = self
            .metrics_source
            .node_latency(&target.namespace)
            .await
            .map_err(ReconcileError::Metrics)?;

        let cluster_topology = self
            .cluster
            .cluster_topology()
            .await
            .map_err(ReconcileError::ClusterState)?;

        let request = ReconcileRequest {
            deployment: target.deployment.clone(),
            namespace: target.namespace.clone(),
            replica_pods,
            nodes_latency,
            cluster_topology,
        };

        let outcome = self.balancer.execute(&request).await?;
        Ok((outcome, dropped))
    }

    async fn report_health(
        &self,
        summary: &TickSummary,
        metrics_error: Option<String>,
        cluster_error: Option<String>,
    ) {
        self.health
            .report(components::METRICS_SOURCE, metrics_error)
            .await;
        self.health
            .report(components::CLUSTER_STATE, cluster_error)
            .await;

        let total = self.targets.len();
        if summary.failed == 0 {
            self.health.set_healthy(components::RECONCILER).await;
        } else if summary.failed == total {
            self.health
                .set_unhealthy(components::RECONCILER, "All targets failed")
                .await;
        } else {
            self.health
                .set_degraded(
                    components::RECONCILER,
                    format!("{} of {} targets failed", summary.failed, total),
                )
                .await;
        }
    }
}

/// Random jitter between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for the reconcile loop
pub struct ReconcileLoopBuilder {
    cluster: Option<Arc<dyn ClusterState>>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    targets: Vec<Target>,
    registry: Option<Arc<TargetRegistry>>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    config: LoopConfig,
}

impl ReconcileLoopBuilder {
    pub fn new() -> Self {
        Self {
            cluster: None,
            metrics_source: None,
            targets: Vec::new(),
            registry: None,
            health: None,
            logger: None,
            config: LoopConfig::default(),
        }
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterState>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn targets(mut self, targets: Vec<Target>) -> Self {
        self.targets = targets;
        self
    }

    /// Share a registry with the HTTP API
    pub fn registry(mut self, registry: Arc<TargetRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn backfill(mut self, backfill: BackfillConfig) -> Self {
        self.config.backfill = backfill;
        self
    }

    pub fn balancer_config(mut self, config: BalancerConfig) -> Self {
        self.config.balancer = config;
        self
    }

    pub fn build(self) -> Result<ReconcileLoop> {
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow!("Cluster state is required"))?;
        let metrics_source = self
            .metrics_source
            .ok_or_else(|| anyhow!("Metrics source is required"))?;
        if self.targets.is_empty() {
            bail!("At least one target is required");
        }

        Ok(ReconcileLoop::new(
            cluster,
            metrics_source,
            self.targets,
            self.registry.unwrap_or_default(),
            self.health.unwrap_or_default(),
            self.logger
                .unwrap_or_else(|| StructuredLogger::new("opti-balancer")),
            self.config,
        ))
    }
}

impl Default for ReconcileLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
