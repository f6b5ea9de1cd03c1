//! Fake collaborators for deterministic workflow tests

use super::collaborators::{
    AvailabilitySource, Candidate, CollaboratorError, InferenceQuery, InferenceResponse,
    InferenceService, MetadataService,
};
use crate::cache::{CacheError, CacheStore};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use vigil_common::ProbeStatus;

// ============================================================================
// Inference
// ============================================================================

pub struct FakeInference {
    outcome: Result<InferenceResponse, CollaboratorError>,
    delay: Option<Duration>,
    hang: bool,
    calls: AtomicUsize,
    queries: Mutex<Vec<InferenceQuery>>,
}

impl FakeInference {
    fn with_outcome(outcome: Result<InferenceResponse, CollaboratorError>) -> Self {
        Self {
            outcome,
            delay: None,
            hang: false,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn returning(candidates: Vec<Candidate>) -> Self {
        Self::with_outcome(Ok(InferenceResponse {
            candidates,
            catalog_size: None,
        }))
    }

    pub fn failing(err: CollaboratorError) -> Self {
        Self::with_outcome(Err(err))
    }

    /// Never answers
    pub fn hanging() -> Self {
        let mut fake = Self::returning(Vec::new());
        fake.hang = true;
        fake
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_catalog_size(mut self, size: u64) -> Self {
        if let Ok(response) = &mut self.outcome {
            response.catalog_size = Some(size);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<InferenceQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InferenceService for FakeInference {
    async fn query(&self, query: &InferenceQuery) -> Result<InferenceResponse, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

// ============================================================================
// Metadata
// ============================================================================

pub struct FakeMetadata {
    failing_ids: HashSet<String>,
    fail_all: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeMetadata {
    /// Answers `{"id": <id>, "source": "fake"}` for every candidate
    pub fn ok() -> Self {
        Self {
            failing_ids: HashSet::new(),
            fail_all: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::ok()
        }
    }

    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            failing_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::ok()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    async fn enrich(&self, candidate: &Candidate) -> Result<Value, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_all || self.failing_ids.contains(&candidate.id) {
            return Err(CollaboratorError::Protocol(format!(
                "fake metadata failure for {}",
                candidate.id
            )));
        }
        Ok(json!({ "id": candidate.id, "source": "fake" }))
    }
}

// ============================================================================
// Availability and cache
// ============================================================================

/// Fixed dependency statuses
#[derive(Debug, Default)]
pub struct StaticAvailability {
    statuses: HashMap<String, ProbeStatus>,
    fallback: Option<ProbeStatus>,
}

impl StaticAvailability {
    pub fn available() -> Self {
        Self {
            statuses: HashMap::new(),
            fallback: Some(ProbeStatus::Available),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            statuses: HashMap::new(),
            fallback: Some(ProbeStatus::Unavailable),
        }
    }

    pub fn with(mut self, name: &str, status: ProbeStatus) -> Self {
        self.statuses.insert(name.to_string(), status);
        self
    }
}

#[async_trait]
impl AvailabilitySource for StaticAvailability {
    async fn status_of(&self, name: &str) -> Option<ProbeStatus> {
        self.statuses.get(name).copied().or(self.fallback)
    }
}

/// Cache whose every operation fails, with operation counters
#[derive(Debug, Default)]
pub struct FailingCache {
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl FailingCache {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Protocol("fake cache failure".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Protocol("fake cache failure".to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::Protocol("fake cache failure".to_string()))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}
