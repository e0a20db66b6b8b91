//! Collaborators the balancer talks to
//!
//! This module provides:
//! - `ClusterState`: reads and applies routing state, lists pods and nodes
//! - `MetricsSource`: upstream call graph, node latency and pod usage
//! - Kubernetes and Prometheus implementations of both
//! - Backfill of missing per-pod usage with bounded concurrency

mod backfill;
mod kubernetes;
mod prometheus;

pub use backfill::{backfill_pods, resolve_pod, BackfillConfig, BackfillOutcome};
pub use kubernetes::KubeClusterState;
pub use self::prometheus::{PrometheusConfig, PrometheusMetricsSource};

use crate::mapper::{DestinationRule, RoutingStateRef};
use crate::models::{ClusterTopology, LatencyEdge, PodSample, UpstreamGraphEntry};
use anyhow::Result;

pub use async_trait::async_trait;

/// Cluster-side state: persisted routing rules, pods and node topology
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Read a routing-state object; `Ok(None)` when it does not exist
    async fn read_routing_state(
        &self,
        reference: &RoutingStateRef,
    ) -> Result<Option<serde_json::Value>>;

    /// Create or update a DestinationRule
    async fn apply_routing_state(&self, rule: &DestinationRule) -> Result<()>;

    /// Pods backing a deployment, with their node placement
    async fn replica_pods(&self, deployment: &str, namespace: &str) -> Result<Vec<PodSample>>;

    /// Region and zone of every node
    async fn cluster_topology(&self) -> Result<Vec<ClusterTopology>>;
}

/// Metrics-side inputs: traffic topology, latency and pod usage
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Nodes sending traffic to the deployment, with their destinations
    async fn upstream_graph(
        &self,
        deployment: &str,
        namespace: &str,
    ) -> Result<Vec<UpstreamGraphEntry>>;

    /// Directed node-to-node latency
    async fn node_latency(&self, namespace: &str) -> Result<Vec<LatencyEdge>>;

    /// Current CPU usage in cores; `None` when no sample exists
    async fn current_pod_cpu_usage(&self, pod: &str, namespace: &str) -> Result<Option<f64>>;

    /// Current memory usage in bytes; `None` when no sample exists
    async fn current_pod_memory_usage(&self, pod: &str, namespace: &str) -> Result<Option<f64>>;

    /// Average CPU usage over `window` (e.g. "2m")
    async fn avg_pod_cpu_usage(
        &self,
        pod: &str,
        namespace: &str,
        window: &str,
    ) -> Result<Option<f64>>;

    /// Average memory usage over `window`
    async fn avg_pod_memory_usage(
        &self,
        pod: &str,
        namespace: &str,
        window: &str,
    ) -> Result<Option<f64>>;
}
