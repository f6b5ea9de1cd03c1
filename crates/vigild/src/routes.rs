//! HTTP route handlers

use crate::server::AppStateArc;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;
use vigil_common::{
    ErrorKind, OverallStatus, RecommendationRequest, SummaryStatus, WorkflowResult,
    WorkflowStatus,
};

// ============================================================================
// Health
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/health", get(health_summary).fallback(method_not_allowed))
        .route(
            "/health/detailed",
            get(health_detailed).fallback(method_not_allowed),
        )
        .route("/health/live", get(liveness).fallback(method_not_allowed))
}

/// Binary summary; degraded still counts as healthy
async fn health_summary(State(state): State<AppStateArc>) -> Response {
    let summary = state.aggregator.aggregate().await.summary();
    let code = match summary.status {
        SummaryStatus::Healthy => StatusCode::OK,
        SummaryStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(summary)).into_response()
}

async fn health_detailed(State(state): State<AppStateArc>) -> Response {
    let report = state.aggregator.aggregate().await;
    let code = match report.status {
        OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        OverallStatus::Healthy | OverallStatus::Degraded => StatusCode::OK,
    };
    (code, Json((*report).clone())).into_response()
}

/// Process liveness only; never probes dependencies
async fn liveness(State(state): State<AppStateArc>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "service": state.aggregator.settings().service,
        "timestamp": chrono::Utc::now(),
    }))
}

// ============================================================================
// Workflow
// ============================================================================

pub fn workflow_routes() -> Router<AppStateArc> {
    Router::new().route(
        "/v1/recommendations",
        post(recommend).fallback(method_not_allowed),
    )
}

async fn recommend(
    State(state): State<AppStateArc>,
    payload: Result<Json<RecommendationRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let result = WorkflowResult::failed(
                Uuid::new_v4(),
                ErrorKind::InvalidRequest,
                rejection.body_text(),
            );
            state.telemetry.record_workflow(&result);
            return (StatusCode::BAD_REQUEST, Json(result)).into_response();
        }
    };

    // Cancelled on server shutdown, or when the client disconnects and this
    // handler future is dropped
    let cancel = state.shutdown.child_token();
    let _disconnect = cancel.clone().drop_guard();

    let result = state.orchestrator.run(request, cancel).await;
    (workflow_status_code(&result), Json(result)).into_response()
}

/// HTTP status for a workflow result
pub fn workflow_status_code(result: &WorkflowResult) -> StatusCode {
    match result.status {
        WorkflowStatus::Success | WorkflowStatus::Partial => StatusCode::OK,
        WorkflowStatus::Failed => match result.error_kind() {
            Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
            Some(ErrorKind::DependencyUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Some(ErrorKind::NoRecommendations) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(ErrorKind::ProtocolError) | Some(ErrorKind::ConnectionRefused) => {
                StatusCode::BAD_GATEWAY
            }
            // Client closed request
            Some(ErrorKind::Cancelled) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Some(ErrorKind::InternalError) | None => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

// ============================================================================
// Metrics and fallbacks
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new().route("/metrics", get(metrics).fallback(method_not_allowed))
}

async fn metrics(State(state): State<AppStateArc>) -> Response {
    match state.telemetry.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, state.telemetry.content_type())],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": "method_not_allowed",
            "message": format!("{} is not allowed on {}", method, uri.path()),
        })),
    )
        .into_response()
}

pub async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": format!("no route for {}", uri.path()),
        })),
    )
        .into_response()
}
