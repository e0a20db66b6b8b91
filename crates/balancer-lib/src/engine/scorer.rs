//! Edge weight scoring
//!
//! Turns per-pod load, inter-node latency and the upstream call graph into
//! raw, unnormalized weights for every (source node, destination node) edge
//! that carries observed traffic.

use crate::models::{LatencyEdge, MetricKind, PodMetric, UpstreamGraphEntry, WeightEdge};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Upper bound for both the load and the latency penalty, so no edge is
/// driven to zero weight by a single factor
pub const MAX_PENALTY: f64 = 0.9;

/// Denominator used when turning an edge latency into a ratio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyNormalization {
    /// Divide by the latency summed over every destination node. A
    /// destination's dominant incoming edge never reaches a ratio of 1 when
    /// several destinations exist.
    #[default]
    Global,
    /// Divide by the latency summed over edges into the same destination
    PerDestination,
}

impl std::str::FromStr for LatencyNormalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "global" => Ok(LatencyNormalization::Global),
            "per_destination" => Ok(LatencyNormalization::PerDestination),
            other => Err(format!("unknown latency normalization: {}", other)),
        }
    }
}

/// Score every relevant latency edge.
///
/// An edge is relevant when its `to` hosts at least one pod and its `from`
/// appears in the upstream graph.
pub fn score(
    pods: &[PodMetric],
    upstream: &[UpstreamGraphEntry],
    latency: &[LatencyEdge],
    kind: MetricKind,
    normalization: LatencyNormalization,
) -> Vec<WeightEdge> {
    if pods.is_empty() || upstream.is_empty() {
        return Vec::new();
    }

    let pods_per_node = group_pods_by_node(pods);
    let sources: HashSet<&str> = upstream.iter().map(|u| u.node.as_str()).collect();

    let total_replicas = pods.len().max(1) as f64;
    let mean_load = finite_or_zero(total_load(pods.iter(), kind) / total_replicas);

    let global_latency: f64 = pods_per_node
        .keys()
        .map(|dest| {
            incoming(latency, &sources, dest)
                .iter()
                .map(|e| e.latency)
                .sum::<f64>()
        })
        .sum();

    let mut weights = Vec::new();

    for (node, node_pods) in &pods_per_node {
        let node_load = finite_or_zero(
            total_load(node_pods.iter().copied(), kind) / node_pods.len().max(1) as f64,
        );
        let normalized_load = load_penalty(node_load, mean_load);
        let capacity_share = node_pods.len() as f64 / total_replicas;

        let edges = incoming(latency, &sources, node);
        let denominator = match normalization {
            LatencyNormalization::Global => global_latency,
            LatencyNormalization::PerDestination => edges.iter().map(|e| e.latency).sum(),
        };

        for edge in edges {
            let latency_ratio = latency_penalty(edge.latency, denominator);
            weights.push(WeightEdge {
                from: edge.from.clone(),
                to: edge.to.clone(),
                weight: capacity_share * (1.0 - latency_ratio) * (1.0 - normalized_load),
            });
        }
    }

    weights
}

fn group_pods_by_node(pods: &[PodMetric]) -> BTreeMap<&str, Vec<&PodMetric>> {
    let mut nodes: BTreeMap<&str, Vec<&PodMetric>> = BTreeMap::new();
    for pod in pods {
        nodes.entry(pod.node.as_str()).or_default().push(pod);
    }
    nodes
}

/// Latency edges into `dest` whose source is a known upstream node
fn incoming<'a>(
    latency: &'a [LatencyEdge],
    sources: &HashSet<&str>,
    dest: &str,
) -> Vec<&'a LatencyEdge> {
    latency
        .iter()
        .filter(|e| e.to == dest && sources.contains(e.from.as_str()))
        .collect()
}

fn total_load<'a>(pods: impl Iterator<Item = &'a PodMetric>, kind: MetricKind) -> f64 {
    pods.map(|p| p.load(kind)).sum()
}

/// Load ratio against the fleet mean, capped at [`MAX_PENALTY`].
///
/// Ratios at or above 1 are first pinned to exactly 1. The later cap makes
/// that step redundant, but it is kept so boundary behavior stays explicit.
fn load_penalty(node_load: f64, mean_load: f64) -> f64 {
    let raw = if mean_load > 0.0 {
        node_load / mean_load
    } else {
        1.0
    };
    let ratio = if !raw.is_finite() || raw >= 1.0 { 1.0 } else { raw };
    ratio.min(MAX_PENALTY)
}

fn latency_penalty(latency: f64, denominator: f64) -> f64 {
    let raw = if denominator > 0.0 {
        latency / denominator
    } else {
        0.0
    };
    let ratio = if !raw.is_finite() || raw < 0.0 { 0.0 } else { raw };
    ratio.min(MAX_PENALTY)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
