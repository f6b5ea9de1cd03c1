//! HTTP client for talking to vigild.

use anyhow::{anyhow, Context, Result};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use vigil_common::{HealthReport, HealthSummary, RecommendationRequest, WorkflowResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for the vigild HTTP API
pub struct VigilClient {
    http: reqwest::Client,
    base: Url,
}

impl VigilClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("Invalid daemon URL: {}", base))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid path {}", path))
    }

    /// `GET /health`; a 503 still carries a summary
    pub async fn summary(&self) -> Result<HealthSummary> {
        let response = self.send(self.http.get(self.url("/health")?)).await?;
        decode(response, &[StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE]).await
    }

    /// `GET /health/detailed`
    pub async fn detailed(&self) -> Result<HealthReport> {
        let response = self.send(self.http.get(self.url("/health/detailed")?)).await?;
        decode(response, &[StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE]).await
    }

    /// `POST /v1/recommendations`; failed workflows come back as results too
    pub async fn recommend(&self, request: &RecommendationRequest) -> Result<WorkflowResult> {
        let response = self
            .send(self.http.post(self.url("/v1/recommendations")?).json(request))
            .await?;
        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;
        serde_json::from_str(&body)
            .map_err(|_| anyhow!("Unexpected response from vigild (HTTP {}): {}", status, body))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request.send().await.map_err(|e| {
            if e.is_connect() {
                anyhow!(
                    "Cannot connect to vigild at {}\n\n\
                     Is the daemon running? Start it with:\n\
                     vigild --config /etc/vigil/config.toml",
                    self.base
                )
            } else if e.is_timeout() {
                anyhow!("vigild at {} did not answer in time", self.base)
            } else {
                anyhow!("Request to vigild failed: {}", e)
            }
        })
    }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    expected: &[StatusCode],
) -> Result<T> {
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;
    if !expected.contains(&status) {
        return Err(anyhow!("vigild returned HTTP {}: {}", status, body));
    }
    serde_json::from_str(&body).with_context(|| format!("Malformed response (HTTP {})", status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_common::{OverallStatus, SummaryStatus, WorkflowStatus};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> VigilClient {
        VigilClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn report_json(status: &str) -> serde_json::Value {
        json!({
            "status": status,
            "timestamp": "2026-01-01T00:00:00Z",
            "service": "vigil",
            "version": "0.1.0",
            "uptime": 12,
            "dependencies": [{
                "name": "inference",
                "status": "unavailable",
                "response_time": 2000,
                "last_check": "2026-01-01T00:00:00Z",
                "error": "timeout"
            }],
            "metrics": { "cpu_usage": 3.5 }
        })
    }

    #[tokio::test]
    async fn test_summary_accepts_503() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "status": "unhealthy",
                "timestamp": "2026-01-01T00:00:00Z",
                "service": "vigil"
            })))
            .mount(&server)
            .await;

        let summary = client(&server).summary().await.unwrap();
        assert_eq!(summary.status, SummaryStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_detailed_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health/detailed"))
            .respond_with(ResponseTemplate::new(503).set_body_json(report_json("unhealthy")))
            .mount(&server)
            .await;

        let report = client(&server).detailed().await.unwrap();
        assert_eq!(report.status, OverallStatus::Unhealthy);
        assert_eq!(report.dependencies[0].response_time, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_unexpected_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server).summary().await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_recommend_returns_failed_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/recommendations"))
            .and(body_partial_json(json!({ "user_context": { "user_id": "u-1" } })))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "workflow_id": "6f1c1f8e-0d5c-4a43-9a0e-8a6c0b1f1a11",
                "status": "failed",
                "recommendations": [],
                "error": { "kind": "dependency_unavailable", "message": "inference down" }
            })))
            .mount(&server)
            .await;

        let result = client(&server)
            .recommend(&RecommendationRequest::for_user("u-1"))
            .await
            .unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_connection_refused_message() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let client = VigilClient::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();

        let err = client.summary().await.unwrap_err();
        assert!(err.to_string().contains("Cannot connect"));
    }
}
