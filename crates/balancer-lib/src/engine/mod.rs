//! Traffic-weight engine
//!
//! Computes a locality-weighted traffic distribution for a destination
//! service:
//! - Scoring edges by destination load, latency and capacity
//! - Normalizing shares and enforcing a local-affinity floor
//! - Rounding to integer percentages that sum to exactly 100 per source
//! - Stepping a live distribution toward a target without oscillating
//!
//! Everything here is synchronous and side-effect free.

mod affinity;
mod convergence;
mod rounding;
mod scorer;


pub use affinity::{enforce_local_share, normalize, DEFAULT_MIN_LOCAL_SHARE};
pub use convergence::{
    distribute_to_percent_list, l1_distance, percent_list_to_distribute, step_toward_target,
    DEFAULT_CHANGE_THRESHOLD, DEFAULT_EPSILON, DEFAULT_STEP_SIZE,
};
pub use rounding::{apportion, normalize_to_100, to_percent, PERCENT_TOTAL};
pub use scorer::{score, LatencyNormalization, MAX_PENALTY};

use crate::models::{
    DistributeMap, LatencyEdge, MetricKind, PercentEdge, PodMetric, UpstreamGraphEntry,
};
use serde::{Deserialize, Serialize};

/// Configuration for target computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Resource dimension used for the load penalty
    pub metric_kind: MetricKind,
    /// Minimum fraction of a source's traffic kept local (default: 0.35)
    pub min_local_share: f64,
    /// Latency ratio denominator
    pub latency_normalization: LatencyNormalization,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metric_kind: MetricKind::default(),
            min_local_share: DEFAULT_MIN_LOCAL_SHARE,
            latency_normalization: LatencyNormalization::default(),
        }
    }
}

/// Computes target distributions and steps live ones toward them
#[derive(Debug, Clone, Default)]
pub struct TrafficEngine {
    config: EngineConfig,
}

impl TrafficEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Engine with default settings for the given metric kind
    pub fn with_metric_kind(metric_kind: MetricKind) -> Self {
        Self::new(EngineConfig {
            metric_kind,
            ..EngineConfig::default()
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Score, normalize and round into per-source percentages.
    ///
    /// Returns an empty list when there is nothing to route.
    pub fn calculate_traffic(
        &self,
        replica_pods: &[PodMetric],
        upstream: &[UpstreamGraphEntry],
        nodes_latency: &[LatencyEdge],
    ) -> Vec<PercentEdge> {
        let weights = score(
            replica_pods,
            upstream,
            nodes_latency,
            self.config.metric_kind,
            self.config.latency_normalization,
        );
        let shares = normalize(&weights, self.config.min_local_share);
        to_percent(&shares)
    }

    pub fn percent_list_to_distribute(&self, list: &[PercentEdge]) -> DistributeMap {
        percent_list_to_distribute(list)
    }

    pub fn distribute_to_percent_list(&self, distribute: &DistributeMap) -> Vec<PercentEdge> {
        distribute_to_percent_list(distribute)
    }

    pub fn step_toward_target(
        &self,
        current: &DistributeMap,
        target: &DistributeMap,
        step_size: u32,
        epsilon: f64,
    ) -> DistributeMap {
        step_toward_target(current, target, step_size, epsilon)
    }

    pub fn l1_distance(&self, a: &DistributeMap, b: &DistributeMap) -> u32 {
        l1_distance(a, b)
    }
}
