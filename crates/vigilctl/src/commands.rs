//! Command implementations for vigilctl
//!
//! Each command returns the process exit code: 0 when the service is serving
//! (or the workflow produced recommendations), 2 when it is not, 1 on a
//! failed workflow.

use crate::client::VigilClient;
use crate::display;
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use vigil_common::{
    QualityRequirements, RecommendationRequest, SummaryStatus, WorkflowStatus,
    DEFAULT_MAX_RESULTS,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_UNHEALTHY: i32 = 2;

/// Arguments of `vigilctl recommend`
pub struct RecommendArgs {
    pub user: String,
    pub context: Option<String>,
    pub min_confidence: f64,
    pub max_results: Option<usize>,
    pub json: bool,
}

pub async fn status(client: &VigilClient) -> Result<i32> {
    let summary = client.summary().await?;
    display::print_summary(&summary);
    Ok(match summary.status {
        SummaryStatus::Healthy => EXIT_OK,
        SummaryStatus::Unhealthy => EXIT_UNHEALTHY,
    })
}

pub async fn health(client: &VigilClient, json: bool) -> Result<i32> {
    let report = client.detailed().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display::print_report(&report);
    }
    Ok(if report.status.is_serving() {
        EXIT_OK
    } else {
        EXIT_UNHEALTHY
    })
}

pub async fn recommend(client: &VigilClient, args: RecommendArgs) -> Result<i32> {
    let request = build_request(&args)?;
    let result = client.recommend(&request).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        display::print_workflow(&result);
    }
    Ok(match result.status {
        WorkflowStatus::Success | WorkflowStatus::Partial => EXIT_OK,
        WorkflowStatus::Failed => EXIT_FAILED,
    })
}

/// `--context` must be a JSON object; `--user` always wins over a `user_id`
/// inside it
pub fn build_request(args: &RecommendArgs) -> Result<RecommendationRequest> {
    let mut context = match &args.context {
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => map,
            _ => return Err(anyhow!("--context must be a JSON object")),
        },
        None => Map::new(),
    };
    context.insert("user_id".to_string(), Value::String(args.user.clone()));

    Ok(RecommendationRequest {
        user_context: Value::Object(context),
        quality_requirements: QualityRequirements {
            min_confidence: args.min_confidence,
            max_results: args.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            extra: Map::new(),
        },
    })
}
