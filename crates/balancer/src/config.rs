//! Daemon configuration
//!
//! Read from `BALANCER_*` environment variables, optionally layered over a
//! file named by `BALANCER_CONFIG_FILE`.

use anyhow::{bail, Context, Result};
use balancer_lib::adapters::{BackfillConfig, PrometheusConfig};
use balancer_lib::balancer::{BalancerConfig, Target};
use balancer_lib::engine::LatencyNormalization;
use balancer_lib::models::{MetricKind, MetricWeights};
use serde::Deserialize;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Name used in structured logs (pod name from the downward API)
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between reconcile ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Comma-separated `namespace/deployment` list
    #[serde(default)]
    pub targets: String,

    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default = "default_prometheus_timeout")]
    pub prometheus_timeout_secs: u64,

    /// CPU, MEMORY or CPU_MEMORY
    #[serde(default = "default_metric_kind")]
    pub metric_kind: String,

    /// global or per_destination
    #[serde(default = "default_latency_normalization")]
    pub latency_normalization: String,

    #[serde(default = "default_min_local_share")]
    pub min_local_share: f64,

    #[serde(default = "default_step_size")]
    pub step_size: u32,

    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    #[serde(default = "default_change_threshold")]
    pub change_threshold: u32,

    #[serde(default = "default_weight")]
    pub cpu_weight: f64,

    #[serde(default = "default_weight")]
    pub memory_weight: f64,

    /// Averaging window for backfilled usage (PromQL duration)
    #[serde(default = "default_backfill_window")]
    pub backfill_window: String,

    #[serde(default = "default_backfill_concurrency")]
    pub backfill_concurrency: usize,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "opti-balancer".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    30
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_prometheus_timeout() -> u64 {
    10
}

fn default_metric_kind() -> String {
    MetricKind::CpuMemory.to_string()
}

fn default_latency_normalization() -> String {
    "global".to_string()
}

fn default_min_local_share() -> f64 {
    0.35
}

fn default_step_size() -> u32 {
    5
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_change_threshold() -> u32 {
    10
}

fn default_weight() -> f64 {
    0.5
}

fn default_backfill_window() -> String {
    "2m".to_string()
}

fn default_backfill_concurrency() -> usize {
    8
}

impl DaemonConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("BALANCER_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path));
        }

        builder = builder.add_source(config::Environment::with_prefix("BALANCER").try_parsing(true));

        Self::from_builder(builder)
    }

    /// Build and validate from an assembled source stack
    pub fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: DaemonConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_local_share) {
            bail!(
                "min_local_share must be within [0, 1], got {}",
                self.min_local_share
            );
        }
        if self.step_size == 0 {
            bail!("step_size must be positive");
        }
        if self.epsilon < 0.0 {
            bail!("epsilon must not be negative");
        }
        if self.cpu_weight < 0.0 || self.memory_weight < 0.0 {
            bail!("cpu_weight and memory_weight must not be negative");
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be positive");
        }
        Ok(())
    }

    /// Configured reconcile targets; at least one is required
    pub fn targets(&self) -> Result<Vec<Target>> {
        let targets = Target::parse_list(&self.targets)?;
        if targets.is_empty() {
            bail!("No targets configured, set BALANCER_TARGETS=namespace/deployment,...");
        }
        Ok(targets)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn balancer_config(&self) -> Result<BalancerConfig> {
        let metric_kind = self
            .metric_kind
            .parse::<MetricKind>()
            .map_err(anyhow::Error::msg)?;
        let latency_normalization = self
            .latency_normalization
            .parse::<LatencyNormalization>()
            .map_err(anyhow::Error::msg)?;

        Ok(BalancerConfig {
            metric_kind,
            min_local_share: self.min_local_share,
            step_size: self.step_size,
            epsilon: self.epsilon,
            change_threshold: self.change_threshold,
            latency_normalization,
        })
    }

    pub fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig {
            avg_window: self.backfill_window.clone(),
            weights: MetricWeights {
                cpu: self.cpu_weight,
                memory: self.memory_weight,
            },
            concurrency: self.backfill_concurrency.max(1),
        }
    }

    pub fn prometheus_config(&self) -> PrometheusConfig {
        PrometheusConfig {
            endpoint: self.prometheus_url.clone(),
            timeout: Duration::from_secs(self.prometheus_timeout_secs),
            ..PrometheusConfig::default()
        }
    }
}
