//! Observability infrastructure for the balancer
//!
//! Provides:
//! - Prometheus metrics (reconcile latency, outcomes, routing distance)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile latency (in seconds)
const RECONCILE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<Option<BalancerMetricsInner>> = OnceLock::new();

struct BalancerMetricsInner {
    reconcile_latency_seconds: Histogram,
    reconcile_iterations: IntCounterVec,
    routing_distance: IntGaugeVec,
    pods_dropped: IntCounter,
    targets_configured: IntGauge,
}

impl BalancerMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            reconcile_latency_seconds: register_histogram!(
                "opti_balancer_reconcile_latency_seconds",
                "Time spent reconciling one target",
                RECONCILE_BUCKETS.to_vec()
            )?,

            reconcile_iterations: register_int_counter_vec!(
                "opti_balancer_reconcile_iterations_total",
                "Reconcile iterations by outcome",
                &["outcome"]
            )?,

            routing_distance: register_int_gauge_vec!(
                "opti_balancer_routing_distance",
                "L1 distance between current and target routing at the last iteration",
                &["namespace", "service"]
            )?,

            pods_dropped: register_int_counter!(
                "opti_balancer_pods_dropped_total",
                "Pods skipped because their resource usage could not be resolved"
            )?,

            targets_configured: register_int_gauge!(
                "opti_balancer_targets_configured",
                "Number of deployments under reconciliation"
            )?,
        })
    }

    fn get() -> Option<&'static Self> {
        GLOBAL_METRICS
            .get_or_init(|| match Self::register() {
                Ok(inner) => Some(inner),
                Err(e) => {
                    warn!(error = %e, "Failed to register balancer metrics");
                    None
                }
            })
            .as_ref()
    }
}

/// Balancer metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics; if registration failed every call is a no-op.
#[derive(Clone)]
pub struct BalancerMetrics {
    _private: (),
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BalancerMetrics {
    /// Create a new metrics handle (registers global metrics if needed)
    pub fn new() -> Self {
        BalancerMetricsInner::get();
        Self { _private: () }
    }

    fn with(&self, f: impl FnOnce(&BalancerMetricsInner)) {
        if let Some(inner) = BalancerMetricsInner::get() {
            f(inner);
        }
    }

    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.with(|m| m.reconcile_latency_seconds.observe(duration_secs));
    }

    /// Count one iteration; `outcome` is "applied", "skipped" or "failed"
    pub fn inc_iteration(&self, outcome: &str) {
        self.with(|m| m.reconcile_iterations.with_label_values(&[outcome]).inc());
    }

    pub fn set_routing_distance(&self, namespace: &str, service: &str, distance: u32) {
        self.with(|m| {
            m.routing_distance
                .with_label_values(&[namespace, service])
                .set(i64::from(distance))
        });
    }

    pub fn add_pods_dropped(&self, count: u64) {
        self.with(|m| m.pods_dropped.inc_by(count));
    }

    pub fn set_targets_configured(&self, count: i64) {
        self.with(|m| m.targets_configured.set(count));
    }

    /// Everything in the default registry, in the text exposition format
    pub fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for balancer events
///
/// Emits one `event=` field per significant step so that reconcile history
/// can be followed in JSON logs.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, targets: usize) {
        info!(
            event = "balancer_started",
            instance = %self.instance,
            version = %version,
            targets = targets,
            "OptiBalancer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "balancer_shutdown",
            instance = %self.instance,
            reason = %reason,
            "OptiBalancer shutting down"
        );
    }

    /// Log a DestinationRule write
    pub fn log_routing_applied(
        &self,
        namespace: &str,
        service: &str,
        mode: &str,
        distance: Option<u32>,
        sources: usize,
    ) {
        info!(
            event = "routing_applied",
            instance = %self.instance,
            namespace = %namespace,
            service = %service,
            mode = %mode,
            distance = ?distance,
            sources = sources,
            "Applied routing"
        );
    }

    pub fn log_routing_skipped(&self, namespace: &str, deployment: &str, reason: &str) {
        info!(
            event = "routing_skipped",
            instance = %self.instance,
            namespace = %namespace,
            deployment = %deployment,
            reason = %reason,
            "Skipped routing update"
        );
    }

    pub fn log_reconcile_failed(&self, namespace: &str, deployment: &str, error: &str) {
        warn!(
            event = "reconcile_failed",
            instance = %self.instance,
            namespace = %namespace,
            deployment = %deployment,
            error = %error,
            "Reconcile iteration failed"
        );
    }

    pub fn log_pod_dropped(&self, namespace: &str, pod: &str, reason: &str) {
        info!(
            event = "pod_dropped",
            instance = %self.instance,
            namespace = %namespace,
            pod = %pod,
            reason = %reason,
            "Dropped pod from this iteration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balancer_metrics_creation() {
        let metrics = BalancerMetrics::new();

        metrics.observe_reconcile_latency(0.02);
        metrics.inc_iteration("applied");
        metrics.inc_iteration("skipped");
        metrics.set_routing_distance("shop", "web", 12);
        metrics.add_pods_dropped(2);
        metrics.set_targets_configured(3);

        // A second handle shares the registered metrics
        let again = BalancerMetrics::new();
        again.inc_iteration("failed");
    }

    #[test]
    fn test_metrics_are_gathered() {
        let metrics = BalancerMetrics::new();
        metrics.set_targets_configured(4);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "opti_balancer_targets_configured"));

        let text = String::from_utf8(metrics.encode_text().unwrap()).unwrap();
        assert!(text.contains("# TYPE opti_balancer_targets_configured gauge"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("balancer-0");
        assert_eq!(logger.instance, "balancer-0");
    }
}
