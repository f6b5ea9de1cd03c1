//! Built-in checkers: HTTP endpoint, TCP port, cache store

use super::{CheckSignal, HealthCheck, ProbeError};
use crate::cache::{CacheError, SharedCache};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpStream;

/// Largest health body inspected for a self-reported status
pub const MAX_HEALTH_BODY: usize = 64 * 1024;

/// GET a URL; 2xx is healthy unless the body says otherwise
pub struct HttpCheck {
    client: reqwest::Client,
    url: String,
}

impl HttpCheck {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthCheck for HttpCheck {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn check(&self) -> Result<CheckSignal, ProbeError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(CheckSignal::Degraded("rate limited (HTTP 429)".to_string()));
        }
        if !status.is_success() {
            return Err(ProbeError::Protocol(format!("unexpected HTTP status {}", status)));
        }

        // Health endpoints that return JSON may self-report degradation
        let Some(body) = read_capped(response, MAX_HEALTH_BODY).await? else {
            return Ok(CheckSignal::Healthy);
        };
        if let Ok(doc) = serde_json::from_slice::<Value>(&body) {
            if doc.get("status").and_then(Value::as_str) == Some("degraded") {
                return Ok(CheckSignal::Degraded("dependency reports degraded".to_string()));
            }
        }

        Ok(CheckSignal::Healthy)
    }
}

/// Read at most `limit` bytes of body; `None` when it is longer
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Option<Vec<u8>>, ProbeError> {
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Ok(None);
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

/// Open a TCP connection to `host:port`
pub struct TcpCheck {
    addr: String,
}

impl TcpCheck {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl HealthCheck for TcpCheck {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    async fn check(&self) -> Result<CheckSignal, ProbeError> {
        TcpStream::connect(&self.addr)
            .await
            .map(|_| CheckSignal::Healthy)
            .map_err(|e| ProbeError::from_io(&e))
    }
}

/// PING the shared cache store
pub struct CacheCheck {
    store: SharedCache,
}

impl CacheCheck {
    pub fn new(store: SharedCache) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for CacheCheck {
    fn kind(&self) -> &'static str {
        "cache"
    }

    async fn check(&self) -> Result<CheckSignal, ProbeError> {
        self.store.ping().await.map(|_| CheckSignal::Healthy).map_err(|e| match e {
            CacheError::Io(io) => ProbeError::from_io(&io),
            CacheError::Protocol(msg) => ProbeError::Protocol(msg),
            CacheError::Timeout(_) => ProbeError::Timeout,
        })
    }
}
