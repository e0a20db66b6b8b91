//! In-memory collaborators for tests

use crate::adapters::{async_trait, ClusterState, MetricsSource};
use crate::mapper::{DestinationRule, RoutingStateRef};
use crate::models::{ClusterTopology, LatencyEdge, PodSample, UpstreamGraphEntry};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Metrics source backed by fixed maps
#[derive(Default)]
pub struct MockMetrics {
    upstream: Vec<UpstreamGraphEntry>,
    latency: Vec<LatencyEdge>,
    cpu: HashMap<String, f64>,
    memory: HashMap<String, f64>,
    avg_cpu: HashMap<String, f64>,
    avg_memory: HashMap<String, f64>,
    failing: bool,
    queries: AtomicUsize,
}

impl MockMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upstream(mut self, upstream: Vec<UpstreamGraphEntry>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_latency(mut self, latency: Vec<LatencyEdge>) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_cpu(mut self, pod: &str, value: f64) -> Self {
        self.cpu.insert(pod.to_string(), value);
        self
    }

    pub fn with_memory(mut self, pod: &str, value: f64) -> Self {
        self.memory.insert(pod.to_string(), value);
        self
    }

    pub fn with_avg_cpu(mut self, pod: &str, value: f64) -> Self {
        self.avg_cpu.insert(pod.to_string(), value);
        self
    }

    pub fn with_avg_memory(mut self, pod: &str, value: f64) -> Self {
        self.avg_memory.insert(pod.to_string(), value);
        self
    }

    /// Every query fails
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn lookup(&self, map: &HashMap<String, f64>, pod: &str) -> Result<Option<f64>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("prometheus unavailable");
        }
        Ok(map.get(pod).copied())
    }
}

#[async_trait]
impl MetricsSource for MockMetrics {
    async fn upstream_graph(&self, _: &str, _: &str) -> Result<Vec<UpstreamGraphEntry>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("prometheus unavailable");
        }
        Ok(self.upstream.clone())
    }

    async fn node_latency(&self, _: &str) -> Result<Vec<LatencyEdge>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("prometheus unavailable");
        }
        Ok(self.latency.clone())
    }

    async fn current_pod_cpu_usage(&self, pod: &str, _: &str) -> Result<Option<f64>> {
        self.lookup(&self.cpu, pod)
    }

    async fn current_pod_memory_usage(&self, pod: &str, _: &str) -> Result<Option<f64>> {
        self.lookup(&self.memory, pod)
    }

    async fn avg_pod_cpu_usage(&self, pod: &str, _: &str, _: &str) -> Result<Option<f64>> {
        self.lookup(&self.avg_cpu, pod)
    }

    async fn avg_pod_memory_usage(&self, pod: &str, _: &str, _: &str) -> Result<Option<f64>> {
        self.lookup(&self.avg_memory, pod)
    }
}

/// Cluster state that persists applied rules in memory
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<Option<serde_json::Value>>,
    applied: Mutex<Vec<DestinationRule>>,
    reads: Mutex<Vec<RoutingStateRef>>,
    pods: Vec<PodSample>,
    topology: Vec<ClusterTopology>,
    fail_reads: bool,
    fail_applies: bool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(self, state: serde_json::Value) -> Self {
        *self.state.lock().unwrap() = Some(state);
        self
    }

    pub fn with_pods(mut self, pods: Vec<PodSample>) -> Self {
        self.pods = pods;
        self
    }

    pub fn with_topology(mut self, topology: Vec<ClusterTopology>) -> Self {
        self.topology = topology;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_applies(mut self) -> Self {
        self.fail_applies = true;
        self
    }

    pub fn applied(&self) -> Vec<DestinationRule> {
        self.applied.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<RoutingStateRef> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterState for MockCluster {
    async fn read_routing_state(
        &self,
        reference: &RoutingStateRef,
    ) -> Result<Option<serde_json::Value>> {
        self.reads.lock().unwrap().push(reference.clone());
        if self.fail_reads {
            bail!("apiserver unavailable");
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn apply_routing_state(&self, rule: &DestinationRule) -> Result<()> {
        if self.fail_applies {
            bail!("forbidden");
        }
        *self.state.lock().unwrap() = Some(serde_json::to_value(rule)?);
        self.applied.lock().unwrap().push(rule.clone());
        Ok(())
    }

    async fn replica_pods(&self, _: &str, _: &str) -> Result<Vec<PodSample>> {
        Ok(self.pods.clone())
    }

    async fn cluster_topology(&self) -> Result<Vec<ClusterTopology>> {
        Ok(self.topology.clone())
    }
}
