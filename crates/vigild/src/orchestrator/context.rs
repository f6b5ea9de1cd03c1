//! Context gathering, cache keys and candidate ranking

use super::collaborators::{Candidate, InferenceQuery};
use super::WorkflowError;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use vigil_common::{QualityRequirements, RecommendationRequest, MAX_RESULTS_CEILING};

pub const CACHE_KEY_PREFIX: &str = "vigil:rec:";

const MAX_USER_ID_LEN: usize = 256;

/// Validated, normalized request
#[derive(Debug, Clone, PartialEq)]
pub struct GatheredContext {
    pub user_id: String,
    /// Normalized context object (nulls dropped, `user_id` trimmed)
    pub context: Value,
    pub quality: QualityRequirements,
    /// Hex SHA-256 of the canonical context and quality requirements
    pub digest: String,
    pub cache_key: String,
}

impl GatheredContext {
    pub fn inference_query(&self) -> InferenceQuery {
        InferenceQuery {
            user_id: self.user_id.clone(),
            context: self.context.clone(),
            min_confidence: self.quality.min_confidence,
            max_results: self.quality.max_results,
            extra: self.quality.extra.clone(),
        }
    }
}

pub fn gather(request: &RecommendationRequest) -> Result<GatheredContext, WorkflowError> {
    let Value::Object(raw) = &request.user_context else {
        return Err(invalid("user_context must be a JSON object"));
    };

    let mut context = drop_nulls(raw);
    let user_id = match context.get("user_id") {
        Some(Value::String(id)) => id.trim().to_string(),
        Some(_) => return Err(invalid("user_id must be a string")),
        None => return Err(invalid("user_id is required")),
    };
    if user_id.is_empty() {
        return Err(invalid("user_id must not be empty"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(invalid(format!(
            "user_id longer than {} bytes",
            MAX_USER_ID_LEN
        )));
    }
    context.insert("user_id".to_string(), Value::String(user_id.clone()));

    let quality = request.quality_requirements.clone();
    let min = quality.min_confidence;
    if !min.is_finite() || !(0.0..=1.0).contains(&min) {
        return Err(invalid("min_confidence must be within [0, 1]"));
    }
    if !(1..=MAX_RESULTS_CEILING).contains(&quality.max_results) {
        return Err(invalid(format!(
            "max_results must be within 1..={}",
            MAX_RESULTS_CEILING
        )));
    }

    let context = Value::Object(context);
    let digest = context_digest(&context, &quality);
    let cache_key = cache_key(&user_id, &digest);

    Ok(GatheredContext {
        user_id,
        context,
        quality,
        digest,
        cache_key,
    })
}

fn invalid(msg: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidRequest(msg.into())
}

/// Remove null members from objects, recursively. Array positions are kept.
fn drop_nulls(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), strip(v)))
        .collect()
}

fn strip(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(drop_nulls(map)),
        Value::Array(items) => Value::Array(items.iter().map(strip).collect()),
        other => other.clone(),
    }
}

/// Deterministic JSON rendering with sorted object keys
fn canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn context_digest(context: &Value, quality: &QualityRequirements) -> String {
    let mut text = String::new();
    canonical(context, &mut text);
    text.push('\n');
    let _ = write!(
        text,
        "min_confidence={};max_results={};",
        quality.min_confidence, quality.max_results
    );
    canonical(&Value::Object(quality.extra.clone()), &mut text);

    hex::encode(Sha256::digest(text.as_bytes()))
}

pub fn cache_key(user_id: &str, digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(digest.as_bytes());
    format!("{}{}", CACHE_KEY_PREFIX, hex::encode(hasher.finalize()))
}

/// Validate and rank inference candidates.
///
/// Scores outside [0, 1] or empty ids make the whole response malformed.
/// Duplicates keep their best score; the rest is filtered by
/// `min_confidence`, ordered by descending score (ties keep inference
/// order) and truncated to `max_results`.
pub fn rank(
    candidates: Vec<Candidate>,
    quality: &QualityRequirements,
) -> Result<Vec<Candidate>, WorkflowError> {
    if let Some(bad) = candidates
        .iter()
        .find(|c| !c.score.is_finite() || !(0.0..=1.0).contains(&c.score))
    {
        return Err(WorkflowError::Protocol(format!(
            "candidate {} has confidence {} outside [0, 1]",
            bad.id, bad.score
        )));
    }
    if candidates.iter().any(|c| c.id.trim().is_empty()) {
        return Err(WorkflowError::Protocol("candidate without id".to_string()));
    }

    let mut ranked = candidates;
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    ranked.retain(|c| seen.insert(c.id.clone()) && c.score >= quality.min_confidence);
    ranked.truncate(quality.max_results);

    if ranked.is_empty() {
        return Err(WorkflowError::NoRecommendations(quality.min_confidence));
    }
    Ok(ranked)
}
