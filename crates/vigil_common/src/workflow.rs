//! Recommendation workflow request/result types.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_MAX_RESULTS: usize = 10;
pub const MAX_RESULTS_CEILING: usize = 100;

fn default_min_confidence() -> f64 {
    0.0
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

/// Caller-supplied quality constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRequirements {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Opaque hints forwarded to inference untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Default for QualityRequirements {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_results: default_max_results(),
            extra: Map::new(),
        }
    }
}

/// Body of `POST /v1/recommendations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_context: Value,
    #[serde(default)]
    pub quality_requirements: QualityRequirements,
}

impl RecommendationRequest {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_context: serde_json::json!({ "user_id": user_id }),
            quality_requirements: QualityRequirements::default(),
        }
    }
}

/// One ranked recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Success,
    Partial,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Structured failure carried in a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal outcome of one workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowFailure>,
    #[serde(default)]
    pub cached: bool,
}

impl WorkflowResult {
    pub fn failed(workflow_id: Uuid, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            workflow_id,
            status: WorkflowStatus::Failed,
            recommendations: Vec::new(),
            metadata: None,
            error: Some(WorkflowFailure {
                kind,
                message: message.into(),
            }),
            cached: false,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_failed(&self) -> bool {
        self.status == WorkflowStatus::Failed
    }
}
