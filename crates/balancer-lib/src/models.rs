//! Core data models for the traffic balancer
//!
//! Field names follow the camelCase shape the metrics and cluster
//! collaborators exchange, so scenarios and adapter payloads deserialize
//! directly into these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which resource dimension drives the load penalty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
    Cpu,
    Memory,
    /// Weighted CPU + memory, read from `PercentUsage::combined`
    #[default]
    CpuMemory,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Cpu => write!(f, "CPU"),
            MetricKind::Memory => write!(f, "MEMORY"),
            MetricKind::CpuMemory => write!(f, "CPU_MEMORY"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CPU" => Ok(MetricKind::Cpu),
            "MEMORY" | "MEM" => Ok(MetricKind::Memory),
            "CPU_MEMORY" | "CPU_MEM" | "CPUANDMEMORY" => Ok(MetricKind::CpuMemory),
            other => Err(format!("unknown metric kind: {}", other)),
        }
    }
}

/// Relative weights used to combine CPU and memory percentages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            cpu: 0.5,
            memory: 0.5,
        }
    }
}

/// A CPU/memory pair (absolute units: cores and bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePair {
    pub cpu: f64,
    pub memory: f64,
}

/// Usage as a fraction of the pod's limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentUsage {
    pub cpu: f64,
    pub memory: f64,
    #[serde(alias = "cpuAndMemory")]
    pub combined: f64,
}

impl PercentUsage {
    pub fn is_finite(&self) -> bool {
        self.cpu.is_finite() && self.memory.is_finite() && self.combined.is_finite()
    }
}

/// Fully resolved per-pod resource snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetric {
    pub pod: String,
    pub node: String,
    #[serde(default)]
    pub usage: ResourcePair,
    pub percent_usage: PercentUsage,
    #[serde(default)]
    pub requested: ResourcePair,
    #[serde(default)]
    pub limits: ResourcePair,
}

impl PodMetric {
    /// Load of this pod under the given metric kind
    pub fn load(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Cpu => self.percent_usage.cpu,
            MetricKind::Memory => self.percent_usage.memory,
            MetricKind::CpuMemory => self.percent_usage.combined,
        }
    }
}

/// Pod as listed from the cluster, before missing usage is backfilled.
/// Zero usage and absent percentages mean "unknown".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSample {
    pub pod: String,
    pub node: String,
    #[serde(default)]
    pub usage: ResourcePair,
    #[serde(default)]
    pub percent_usage: Option<PercentUsage>,
    #[serde(default)]
    pub requested: ResourcePair,
    #[serde(default)]
    pub limits: ResourcePair,
}

/// Directed latency observed for traffic flowing `from` -> `to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyEdge {
    pub from: String,
    pub to: String,
    pub latency: f64,
}

/// A destination service receiving traffic from an upstream node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(alias = "destinationServiceName")]
    pub destination_service_name: String,
    #[serde(default)]
    pub rps: f64,
}

/// A node observed sending traffic toward the balanced deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamGraphEntry {
    pub node: String,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

/// Placement of a node in the region/zone hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub node: String,
    pub zone: String,
    pub region: String,
}

impl ClusterTopology {
    /// Mesh locality key, `region/zone/node`
    pub fn locality(&self) -> String {
        format!("{}/{}/{}", self.region, self.zone, self.node)
    }
}

/// Raw, unnormalized edge weight produced by the scorer
#[derive(Debug, Clone, PartialEq)]
pub struct WeightEdge {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

/// Fractional traffic share of an edge
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEdge {
    pub from: String,
    pub to: String,
    pub share: f64,
}

/// Integer traffic percentage of an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentEdge {
    pub from: String,
    pub to: String,
    pub percentage: u32,
}

impl PercentEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, percentage: u32) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            percentage,
        }
    }

    pub fn is_local(&self) -> bool {
        self.from == self.to
    }
}

/// from -> (to -> percentage)
pub type DistributeMap = BTreeMap<String, BTreeMap<String, u32>>;
