//! API client for the balancer daemon

use anyhow::{Context, Result};
use balancer_lib::{balancer::TargetStatus, health::HealthResponse};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

/// API client for the balancer daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(path).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    async fn send(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        self.client
            .get(url)
            .send()
            .await
            .context("Failed to send request")
    }

    /// Status of every configured target
    pub async fn targets(&self) -> Result<Vec<TargetStatus>> {
        self.get("api/v1/targets").await
    }

    pub async fn target(&self, namespace: &str, deployment: &str) -> Result<TargetStatus> {
        self.get(&format!("api/v1/targets/{}/{}", namespace, deployment))
            .await
    }

    /// Daemon health; an unhealthy daemon answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send("healthz").await?;
        let status = response.status();

        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balancer_lib::health::ComponentStatus;

    #[tokio::test]
    async fn test_targets_parses_daemon_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/targets")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"namespace":"shop","deployment":"web","last_outcome":"applied",
                    "service":"web-svc","mode":"stepped","distance":20,
                    "pods_dropped":0,"iterations":3,"failures":0}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let targets = client.targets().await.unwrap();

        mock.assert_async().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].service.as_deref(), Some("web-svc"));
        assert_eq!(targets[0].distance, Some(20));
        assert_eq!(targets[0].iterations, 3);
    }

    #[tokio::test]
    async fn test_missing_target_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/targets/shop/missing")
            .with_status(404)
            .with_body(r#"{"error":"target shop/missing not found"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.target("shop", "missing").await.unwrap_err();

        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_health_accepts_unavailable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"cluster_state":
                    {"status":"unhealthy","message":"forbidden","last_check_timestamp":0}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.health().await.unwrap();

        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components["cluster_state"].message.as_deref(),
            Some("forbidden")
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
