//! Backfill of missing per-pod resource usage
//!
//! Pods listed from the cluster often lack usage percentages. Missing
//! values are fetched from the metrics source, pod by pod, with a bounded
//! number of queries in flight. A pod whose usage cannot be resolved is
//! dropped for this iteration rather than failing it.

use super::MetricsSource;
use crate::models::{MetricWeights, PercentUsage, PodMetric, PodSample, ResourcePair};
use anyhow::Result;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for usage backfill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Averaging window for the requested-usage estimate (default: "2m")
    pub avg_window: String,
    /// Weights for the combined CPU/memory percentage
    pub weights: MetricWeights,
    /// Maximum pods resolved concurrently (default: 8)
    pub concurrency: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            avg_window: "2m".to_string(),
            weights: MetricWeights::default(),
            concurrency: 8,
        }
    }
}

/// Result of resolving one pod
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    Ready(PodMetric),
    Dropped { pod: String, reason: String },
}

impl BackfillOutcome {
    pub fn into_ready(self) -> Option<PodMetric> {
        match self {
            BackfillOutcome::Ready(pod) => Some(pod),
            BackfillOutcome::Dropped { .. } => None,
        }
    }
}

/// Resolve every sample, preserving input order.
///
/// Query failures abort the whole backfill; missing samples only drop the
/// affected pod.
pub async fn backfill_pods(
    source: &dyn MetricsSource,
    samples: Vec<PodSample>,
    namespace: &str,
    config: &BackfillConfig,
) -> Result<Vec<BackfillOutcome>> {
    futures::stream::iter(samples)
        .map(|sample| resolve_pod(source, sample, namespace, config))
        .buffered(config.concurrency.max(1))
        .try_collect()
        .await
}

/// Resolve a single pod's usage, limits and percentages
pub async fn resolve_pod(
    source: &dyn MetricsSource,
    sample: PodSample,
    namespace: &str,
    config: &BackfillConfig,
) -> Result<BackfillOutcome> {
    if let Some(percent) = sample.percent_usage.filter(PercentUsage::is_finite) {
        return Ok(BackfillOutcome::Ready(PodMetric {
            pod: sample.pod,
            node: sample.node,
            usage: sample.usage,
            percent_usage: percent,
            requested: sample.requested,
            limits: sample.limits,
        }));
    }

    let cpu = if sample.usage.cpu == 0.0 {
        source.current_pod_cpu_usage(&sample.pod, namespace).await?
    } else {
        Some(sample.usage.cpu)
    };
    let memory = if sample.usage.memory == 0.0 {
        source.current_pod_memory_usage(&sample.pod, namespace).await?
    } else {
        Some(sample.usage.memory)
    };

    let (Some(cpu), Some(memory)) = (cpu, memory) else {
        info!(pod = %sample.pod, "Skipping pod due to missing resource data");
        return Ok(BackfillOutcome::Dropped {
            pod: sample.pod,
            reason: "missing cpu or memory usage".to_string(),
        });
    };

    let avg_cpu = source
        .avg_pod_cpu_usage(&sample.pod, namespace, &config.avg_window)
        .await?
        .filter(|v| *v > 0.0);
    let avg_memory = source
        .avg_pod_memory_usage(&sample.pod, namespace, &config.avg_window)
        .await?
        .filter(|v| *v > 0.0);

    let limits = ResourcePair {
        cpu: avg_cpu.unwrap_or(cpu) * 2.0,
        memory: avg_memory.unwrap_or(memory) * 2.0,
    };
    let percent_cpu = safe_div(cpu, limits.cpu);
    let percent_memory = safe_div(memory, limits.memory);

    debug!(
        pod = %sample.pod,
        cpu = cpu,
        memory = memory,
        percent_cpu = percent_cpu,
        percent_memory = percent_memory,
        "Backfilled pod usage"
    );

    Ok(BackfillOutcome::Ready(PodMetric {
        pod: sample.pod,
        node: sample.node,
        usage: ResourcePair { cpu, memory },
        percent_usage: PercentUsage {
            cpu: percent_cpu,
            memory: percent_memory,
            combined: config.weights.cpu * percent_cpu + config.weights.memory * percent_memory,
        },
        requested: ResourcePair {
            cpu: avg_cpu.unwrap_or(cpu),
            memory: avg_memory.unwrap_or(memory),
        },
        limits,
    }))
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
