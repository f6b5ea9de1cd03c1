//! Recommendation orchestrator
//!
//! Each request walks a fixed sequence of stages:
//!
//! ```text
//! Pending -> GatheringContext -> QueryingInference -> EnrichingMetadata
//!         -> CachingResult -> Completed
//! ```
//!
//! with `Failed` reachable from every non-terminal stage. Workflows share
//! only the result cache and the in-flight inference table.

pub mod collaborators;
pub mod context;
pub mod fake;
pub mod singleflight;

pub use collaborators::{
    AvailabilitySource, Candidate, CollaboratorError, HttpInferenceClient, HttpMetadataClient,
    InferenceQuery, InferenceResponse, InferenceService, MetadataService,
};
pub use singleflight::SingleFlight;

use crate::cache::SharedCache;
use crate::metrics::{AppCounters, Telemetry};
use context::GatheredContext;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_common::{
    ErrorKind, ProbeStatus, RecommendationRequest, Recommendation, WorkflowResult, WorkflowStatus,
};

/// Workflow stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    GatheringContext,
    QueryingInference,
    EnrichingMetadata,
    CachingResult,
    Completed,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::GatheringContext => "gathering_context",
            Self::QueryingInference => "querying_inference",
            Self::EnrichingMetadata => "enriching_metadata",
            Self::CachingResult => "caching_result",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("dependency '{0}' is unavailable")]
    DependencyUnavailable(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("inference failed: {0}")]
    Inference(CollaboratorError),

    #[error("inference returned malformed candidates: {0}")]
    Protocol(String),

    #[error("no candidates at or above min_confidence {0}")]
    NoRecommendations(f64),

    #[error("workflow cancelled during {0}")]
    Cancelled(Stage),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Inference(e) => e.kind(),
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::NoRecommendations(_) => ErrorKind::NoRecommendations,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Stage the workflow was in when it failed
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidRequest(_) => Stage::GatheringContext,
            Self::Timeout { stage, .. } | Self::Cancelled(stage) => *stage,
            Self::DependencyUnavailable(_)
            | Self::Inference(_)
            | Self::Protocol(_)
            | Self::NoRecommendations(_) => Stage::QueryingInference,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Registered dependency name of the inference service
    pub inference_dependency: String,
    pub inference_timeout: Duration,
    pub enrichment_timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            inference_dependency: "inference".to_string(),
            inference_timeout: Duration::from_secs(3),
            enrichment_timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

type InferenceOutcome = Result<InferenceResponse, CollaboratorError>;

pub struct Orchestrator {
    inference: Arc<dyn InferenceService>,
    metadata: Arc<dyn MetadataService>,
    cache: SharedCache,
    availability: Arc<dyn AvailabilitySource>,
    settings: WorkflowSettings,
    inflight: SingleFlight<InferenceOutcome>,
    counters: Arc<AppCounters>,
    telemetry: Option<Telemetry>,
}

impl Orchestrator {
    pub fn new(
        inference: Arc<dyn InferenceService>,
        metadata: Arc<dyn MetadataService>,
        cache: SharedCache,
        availability: Arc<dyn AvailabilitySource>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            inference,
            metadata,
            cache,
            availability,
            settings,
            inflight: SingleFlight::new(),
            counters: Arc::new(AppCounters::default()),
            telemetry: None,
        }
    }

    pub fn with_counters(mut self, counters: Arc<AppCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn counters(&self) -> &Arc<AppCounters> {
        &self.counters
    }

    /// Run one workflow to a terminal result. Never fails: every error
    /// becomes a `failed` result carrying its kind.
    pub async fn run(
        &self,
        request: RecommendationRequest,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let workflow_id = Uuid::new_v4();
        let _active = self.counters.workflow_started();
        debug!("Workflow {} {}", workflow_id, Stage::Pending);

        let result = match self.execute(workflow_id, &request, &cancel).await {
            Ok(result) => {
                info!(
                    "Workflow {} {} ({}, {} recommendations{})",
                    workflow_id,
                    Stage::Completed,
                    result.status.as_str(),
                    result.recommendations.len(),
                    if result.cached { ", cached" } else { "" }
                );
                result
            }
            Err(e) => {
                let kind = e.kind();
                match kind {
                    ErrorKind::InvalidRequest | ErrorKind::Cancelled => {
                        debug!("Workflow {} {} during {}: {}", workflow_id, Stage::Failed, e.stage(), e)
                    }
                    _ => warn!("Workflow {} {} during {}: {}", workflow_id, Stage::Failed, e.stage(), e),
                }
                WorkflowResult::failed(workflow_id, kind, e.to_string())
            }
        };

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_workflow(&result);
        }
        result
    }

    async fn execute(
        &self,
        workflow_id: Uuid,
        request: &RecommendationRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkflowResult, WorkflowError> {
        debug!("Workflow {} {}", workflow_id, Stage::GatheringContext);
        let ctx = context::gather(request)?;

        debug!("Workflow {} {}", workflow_id, Stage::QueryingInference);
        ensure_live(cancel, Stage::QueryingInference)?;
        if let Some(mut hit) = self.lookup(&ctx.cache_key).await {
            hit.workflow_id = workflow_id;
            hit.cached = true;
            return Ok(hit);
        }

        self.ensure_inference_available(cancel).await?;
        ensure_live(cancel, Stage::QueryingInference)?;
        let response = self.query_inference(&ctx, cancel).await?;
        if let Some(size) = response.catalog_size {
            self.counters.set_catalog_size(size);
        }
        let ranked = context::rank(response.candidates, &ctx.quality)?;

        debug!("Workflow {} {}", workflow_id, Stage::EnrichingMetadata);
        ensure_live(cancel, Stage::EnrichingMetadata)?;
        let metadata = self.enrich(workflow_id, &ranked, cancel).await?;

        let result = WorkflowResult {
            workflow_id,
            status: if metadata.is_some() {
                WorkflowStatus::Success
            } else {
                WorkflowStatus::Partial
            },
            recommendations: ranked.into_iter().map(Recommendation::from).collect(),
            metadata,
            error: None,
            cached: false,
        };

        debug!("Workflow {} {}", workflow_id, Stage::CachingResult);
        ensure_live(cancel, Stage::CachingResult)?;
        self.store(&ctx.cache_key, &result).await;

        Ok(result)
    }

    /// Cache read; errors and undecodable entries count as misses
    async fn lookup(&self, key: &str) -> Option<WorkflowResult> {
        let outcome = match self.cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<WorkflowResult>(&bytes) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed ({}), treating as miss", e);
                self.record_lookup("error");
                return None;
            }
        };
        self.record_lookup(if outcome.is_some() { "hit" } else { "miss" });
        outcome
    }

    fn record_lookup(&self, outcome: &str) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_cache_lookup(outcome);
        }
    }

    async fn ensure_inference_available(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let name = &self.settings.inference_dependency;
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkflowError::Cancelled(Stage::QueryingInference)),
            status = self.availability.status_of(name) => status,
        };

        match status {
            Some(ProbeStatus::Unavailable) => Err(WorkflowError::DependencyUnavailable(name.clone())),
            _ => Ok(()),
        }
    }

    async fn query_inference(
        &self,
        ctx: &GatheredContext,
        cancel: &CancellationToken,
    ) -> Result<InferenceResponse, WorkflowError> {
        let inference = Arc::clone(&self.inference);
        let query = ctx.inference_query();
        let timeout = self.settings.inference_timeout;

        let call = self.inflight.run(&ctx.cache_key, move || async move {
            tokio::time::timeout(timeout, inference.query(&query))
                .await
                .unwrap_or(Err(CollaboratorError::Timeout))
        });

        let (outcome, shared) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkflowError::Cancelled(Stage::QueryingInference)),
            outcome = call => outcome,
        };
        if shared {
            debug!("Joined in-flight inference call for {}", ctx.cache_key);
        }

        outcome.map_err(|e| match e {
            CollaboratorError::Timeout => WorkflowError::Timeout {
                stage: Stage::QueryingInference,
                after: timeout,
            },
            other => WorkflowError::Inference(other),
        })
    }

    /// Best-effort enrichment: `None` on any failure or on timeout
    async fn enrich(
        &self,
        workflow_id: Uuid,
        ranked: &[Candidate],
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, WorkflowError> {
        let calls = try_join_all(ranked.iter().map(|c| self.metadata.enrich(c)));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkflowError::Cancelled(Stage::EnrichingMetadata)),
            outcome = tokio::time::timeout(self.settings.enrichment_timeout, calls) => outcome,
        };

        match outcome {
            Ok(Ok(details)) => {
                let metadata: Map<String, Value> = ranked
                    .iter()
                    .map(|c| c.id.clone())
                    .zip(details)
                    .collect();
                Ok(Some(Value::Object(metadata)))
            }
            Ok(Err(e)) => {
                warn!("Workflow {} enrichment failed: {}", workflow_id, e);
                Ok(None)
            }
            Err(_) => {
                warn!(
                    "Workflow {} enrichment timed out after {:?}",
                    workflow_id, self.settings.enrichment_timeout
                );
                Ok(None)
            }
        }
    }

    /// Write-through; failures are logged and swallowed
    async fn store(&self, key: &str, result: &WorkflowResult) {
        let payload = match serde_json::to_vec(result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize workflow result: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.set(key, payload, self.settings.cache_ttl).await {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }
}

fn ensure_live(cancel: &CancellationToken, stage: Stage) -> Result<(), WorkflowError> {
    if cancel.is_cancelled() {
        Err(WorkflowError::Cancelled(stage))
    } else {
        Ok(())
    }
}
