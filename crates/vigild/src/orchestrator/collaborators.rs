//! Remote collaborators of the recommendation workflow
//!
//! Inference is an opaque ranking capability reached over HTTP POST; metadata
//! enrichment is an HTTP GET per candidate. Both sit behind traits so tests
//! can swap in fakes.

use crate::http_client::classify_error;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use vigil_common::{ErrorKind, ProbeStatus, Recommendation};

/// One ranked candidate returned by inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(alias = "confidence")]
    pub score: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

impl Candidate {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            title: None,
            attributes: Value::Null,
        }
    }
}

impl From<Candidate> for Recommendation {
    fn from(c: Candidate) -> Self {
        Recommendation {
            id: c.id,
            confidence: c.score,
            title: c.title,
            attributes: c.attributes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub candidates: Vec<Candidate>,
    /// Size of the catalog the ranking was drawn from, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_size: Option<u64>,
}

/// Body sent to the inference service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceQuery {
    pub user_id: String,
    pub context: Value,
    pub min_confidence: f64,
    pub max_results: usize,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CollaboratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::ConnectionRefused,
            Self::Protocol(_) | Self::NotFound(_) => ErrorKind::ProtocolError,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        match classify_error(&err) {
            ErrorKind::Timeout => Self::Timeout,
            ErrorKind::ConnectionRefused => Self::Connection(err.to_string()),
            _ => Self::Protocol(err.to_string()),
        }
    }
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn query(&self, query: &InferenceQuery) -> Result<InferenceResponse, CollaboratorError>;
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn enrich(&self, candidate: &Candidate) -> Result<Value, CollaboratorError>;
}

/// Latest known status of a named dependency
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    /// `None` when the dependency is not registered
    async fn status_of(&self, name: &str) -> Option<ProbeStatus>;
}

// ============================================================================
// HTTP implementations
// ============================================================================

pub struct HttpInferenceClient {
    client: reqwest::Client,
    url: String,
}

impl HttpInferenceClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn query(&self, query: &InferenceQuery) -> Result<InferenceResponse, CollaboratorError> {
        debug!("Querying inference for user {}", query.user_id);
        let response = self.client.post(&self.url).json(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Protocol(format!(
                "inference returned HTTP {}",
                status
            )));
        }

        response
            .json::<InferenceResponse>()
            .await
            .map_err(|e| CollaboratorError::Protocol(format!("malformed inference body: {}", e)))
    }
}

/// Fetches `{base}/items/{id}` per candidate
pub struct HttpMetadataClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpMetadataClient {
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    fn item_url(&self, id: &str) -> Result<Url, CollaboratorError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Protocol(format!("unusable base URL {}", self.base)))?
            .pop_if_empty()
            .push("items")
            .push(id);
        Ok(url)
    }
}

#[async_trait]
impl MetadataService for HttpMetadataClient {
    async fn enrich(&self, candidate: &Candidate) -> Result<Value, CollaboratorError> {
        let url = self.item_url(&candidate.id)?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CollaboratorError::NotFound(candidate.id.clone())),
            status if !status.is_success() => Err(CollaboratorError::Protocol(format!(
                "metadata returned HTTP {}",
                status
            ))),
            _ => response
                .json::<Value>()
                .await
                .map_err(|e| CollaboratorError::Protocol(format!("malformed metadata body: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::build_client;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        build_client(Duration::from_secs(2)).unwrap()
    }

    fn query() -> InferenceQuery {
        InferenceQuery {
            user_id: "u-1".to_string(),
            context: json!({"user_id": "u-1"}),
            min_confidence: 0.0,
            max_results: 5,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_inference_client_parses_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rank"))
            .and(body_partial_json(json!({"user_id": "u-1", "max_results": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [
                    {"id": "a", "score": 0.9, "title": "Alpha"},
                    {"id": "b", "confidence": 0.4}
                ],
                "catalog_size": 300
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inference = HttpInferenceClient::new(client(), format!("{}/rank", server.uri()));
        let response = inference.query(&query()).await.unwrap();

        assert_eq!(response.candidates.len(), 2);
        assert_eq!(response.candidates[1].score, 0.4);
        assert_eq!(response.catalog_size, Some(300));
    }

    #[tokio::test]
    async fn test_inference_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let inference = HttpInferenceClient::new(client(), server.uri());
        let err = inference.query(&query()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn test_metadata_client_item_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/items/a%2Fb"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"genre": "jazz"})))
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/v2/", server.uri())).unwrap();
        let metadata = HttpMetadataClient::new(client(), base);
        let details = metadata.enrich(&Candidate::new("a/b", 0.5)).await.unwrap();
        assert_eq!(details["genre"], "jazz");
    }

    #[tokio::test]
    async fn test_metadata_not_found() {
        let server = MockServer::start().await;
        let base = Url::parse(&server.uri()).unwrap();
        let metadata = HttpMetadataClient::new(client(), base);

        let err = metadata.enrich(&Candidate::new("missing", 0.5)).await.unwrap_err();
        assert_eq!(err, CollaboratorError::NotFound("missing".to_string()));
    }
}
