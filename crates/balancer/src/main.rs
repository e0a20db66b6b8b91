//! OptiBalancer - locality-aware traffic balancer
//!
//! Runs as a Deployment in the cluster, periodically rewriting Istio
//! DestinationRules for the configured services.

use anyhow::{Context, Result};
use balancer_lib::{
    adapters::{KubeClusterState, PrometheusMetricsSource},
    balancer::{ReconcileLoopBuilder, TargetRegistry},
    health::HealthRegistry,
    observability::{BalancerMetrics, StructuredLogger},
};
use opti_balancer::{api, config::DaemonConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BALANCER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting opti-balancer");

    let config = DaemonConfig::load()?;
    let targets = config.targets()?;
    info!(
        instance = %config.instance_name,
        targets = targets.len(),
        prometheus = %config.prometheus_url,
        "Balancer configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = BalancerMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(BALANCER_VERSION, targets.len());

    let cluster = Arc::new(KubeClusterState::try_default().await?);
    let metrics_source = Arc::new(
        PrometheusMetricsSource::new(config.prometheus_config())
            .context("Failed to create Prometheus client")?,
    );
    let target_registry = Arc::new(TargetRegistry::new());

    let reconcile_loop = ReconcileLoopBuilder::new()
        .cluster(cluster)
        .metrics_source(metrics_source)
        .targets(targets)
        .registry(target_registry.clone())
        .health(health_registry.clone())
        .logger(logger.clone())
        .interval(config.interval())
        .backfill(config.backfill_config())
        .balancer_config(config.balancer_config()?)
        .build()?;

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        target_registry,
    ));

    health_registry.set_ready(true).await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));
    let loop_handle = tokio::spawn(reconcile_loop.run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    if shutdown_tx.send(()).is_err() {
        warn!("Reconcile loop already stopped");
    }
    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Reconcile loop task failed");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
