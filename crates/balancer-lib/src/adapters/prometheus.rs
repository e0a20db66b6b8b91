//! Prometheus-backed metrics source
//!
//! Issues instant queries against `/api/v1/query`. Queries are templates
//! with `{deployment}`, `{namespace}`, `{pod}` and `{window}` placeholders
//! so they can be adapted to the mesh's metric and label names.

use super::{async_trait, MetricsSource};
use crate::models::{Destination, LatencyEdge, UpstreamGraphEntry};
use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Configuration for the Prometheus metrics source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Prometheus base URL (e.g., "http://prometheus:9090")
    pub endpoint: String,
    /// Request timeout
    pub timeout: Duration,
    /// Rate window used by the upstream query (default: "2m")
    pub rate_window: String,
    /// Series labelled `node` and `destination_service_name`
    pub upstream_query: String,
    /// Series labelled `source_node` and `destination_node`
    pub latency_query: String,
    pub cpu_query: String,
    pub memory_query: String,
    pub avg_cpu_query: String,
    pub avg_memory_query: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://prometheus:9090".to_string(),
            timeout: Duration::from_secs(10),
            rate_window: "2m".to_string(),
            upstream_query: concat!(
                "sum by (node, destination_service_name) (rate(istio_requests_total{",
                "destination_workload=\"{deployment}\",",
                "destination_workload_namespace=\"{namespace}\"}[{window}]))"
            )
            .to_string(),
            latency_query: concat!(
                "avg by (source_node, destination_node) ",
                "(node_to_node_latency_milliseconds{namespace=\"{namespace}\"})"
            )
            .to_string(),
            cpu_query: concat!(
                "sum(rate(container_cpu_usage_seconds_total{",
                "namespace=\"{namespace}\",pod=\"{pod}\",container!=\"\"}[1m]))"
            )
            .to_string(),
            memory_query: concat!(
                "sum(container_memory_working_set_bytes{",
                "namespace=\"{namespace}\",pod=\"{pod}\",container!=\"\"})"
            )
            .to_string(),
            avg_cpu_query: concat!(
                "avg_over_time(sum(rate(container_cpu_usage_seconds_total{",
                "namespace=\"{namespace}\",pod=\"{pod}\",container!=\"\"}[1m]))[{window}:])"
            )
            .to_string(),
            avg_memory_query: concat!(
                "avg_over_time(sum(container_memory_working_set_bytes{",
                "namespace=\"{namespace}\",pod=\"{pod}\",container!=\"\"})[{window}:])"
            )
            .to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Clone, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[timestamp, "value"]`
    value: (f64, String),
}

impl VectorSample {
    fn value(&self) -> Option<f64> {
        self.value.1.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn label(&self, name: &str) -> Option<&str> {
        self.metric.get(name).map(String::as_str)
    }
}

/// Metrics source that queries a Prometheus HTTP API
pub struct PrometheusMetricsSource {
    client: Client,
    base_url: Url,
    config: PrometheusConfig,
}

impl PrometheusMetricsSource {
    pub fn new(config: PrometheusConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(&config.endpoint).context("Invalid Prometheus URL")?;
        // Keep a path prefix such as `/prometheus` when joining query paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Create a source with default queries for the given endpoint
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Self::new(PrometheusConfig {
            endpoint: endpoint.to_string(),
            ..PrometheusConfig::default()
        })
    }

    pub fn endpoint(&self) -> &str {
        self.base_url.as_str()
    }

    /// Run an instant query and return its vector samples
    async fn query(&self, promql: &str) -> Result<Vec<VectorSample>> {
        let url = self
            .base_url
            .join("api/v1/query")
            .context("Invalid query path")?;

        debug!(query = %promql, "Querying Prometheus");

        let response = self
            .client
            .get(url)
            .query(&[("query", promql)])
            .send()
            .await
            .context("Failed to send Prometheus query")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Prometheus error ({}): {}", status, body);
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .context("Failed to parse Prometheus response")?;

        if parsed.status != "success" {
            bail!(
                "Prometheus query failed: {}",
                parsed.error.unwrap_or_else(|| parsed.status.clone())
            );
        }

        match parsed.data {
            Some(data) if data.result_type == "vector" => Ok(data.result),
            Some(data) => bail!("Unexpected Prometheus result type: {}", data.result_type),
            None => Ok(Vec::new()),
        }
    }

    /// Sum of a scalar-like query; `None` when no series matched
    async fn query_scalar(&self, promql: &str) -> Result<Option<f64>> {
        let samples = self.query(promql).await?;
        let values: Vec<f64> = samples.iter().filter_map(VectorSample::value).collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum()))
    }

    fn pod_query(&self, template: &str, pod: &str, namespace: &str, window: &str) -> String {
        render(
            template,
            &[("pod", pod), ("namespace", namespace), ("window", window)],
        )
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn upstream_graph(
        &self,
        deployment: &str,
        namespace: &str,
    ) -> Result<Vec<UpstreamGraphEntry>> {
        let promql = render(
            &self.config.upstream_query,
            &[
                ("deployment", deployment),
                ("namespace", namespace),
                ("window", &self.config.rate_window),
            ],
        );
        let samples = self.query(&promql).await?;

        let mut by_node: BTreeMap<String, Vec<Destination>> = BTreeMap::new();
        for sample in &samples {
            let (Some(node), Some(service)) =
                (sample.label("node"), sample.label("destination_service_name"))
            else {
                warn!(labels = ?sample.metric, "Upstream series missing node or service label");
                continue;
            };
            by_node.entry(node.to_string()).or_default().push(Destination {
                destination_service_name: service.to_string(),
                rps: sample.value().unwrap_or(0.0),
            });
        }

        Ok(by_node
            .into_iter()
            .map(|(node, destinations)| UpstreamGraphEntry { node, destinations })
            .collect())
    }

    async fn node_latency(&self, namespace: &str) -> Result<Vec<LatencyEdge>> {
        let promql = render(&self.config.latency_query, &[("namespace", namespace)]);
        let samples = self.query(&promql).await?;

        Ok(samples
            .iter()
            .filter_map(|s| {
                Some(LatencyEdge {
                    from: s.label("source_node")?.to_string(),
                    to: s.label("destination_node")?.to_string(),
                    latency: s.value()?,
                })
            })
            .collect())
    }

    async fn current_pod_cpu_usage(&self, pod: &str, namespace: &str) -> Result<Option<f64>> {
        self.query_scalar(&self.pod_query(&self.config.cpu_query, pod, namespace, ""))
            .await
    }

    async fn current_pod_memory_usage(&self, pod: &str, namespace: &str) -> Result<Option<f64>> {
        self.query_scalar(&self.pod_query(&self.config.memory_query, pod, namespace, ""))
            .await
    }

    async fn avg_pod_cpu_usage(
        &self,
        pod: &str,
        namespace: &str,
        window: &str,
    ) -> Result<Option<f64>> {
        self.query_scalar(&self.pod_query(&self.config.avg_cpu_query, pod, namespace, window))
            .await
    }

    async fn avg_pod_memory_usage(
        &self,
        pod: &str,
        namespace: &str,
        window: &str,
    ) -> Result<Option<f64>> {
        self.query_scalar(&self.pod_query(
            &self.config.avg_memory_query,
            pod,
            namespace,
            window,
        ))
        .await
    }
}

/// Substitute `{key}` placeholders in a query template
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
