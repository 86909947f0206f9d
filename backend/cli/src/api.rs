use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::json;

use leadflow_core::LeadflowError;
use leadflow_engine::FollowupService;

/// Shared application state for API handlers.
pub struct AppState {
    pub service: Arc<FollowupService>,
}

/// Build the Axum router with the operational routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/followups/trigger", post(trigger_cycle))
        .route("/api/batch/flush", post(flush_batch))
        .route("/api/queue/drain", post(drain_queues))
        .with_state(state)
}

fn error_response(status: StatusCode, err: &LeadflowError) -> Response {
    (
        status,
        Json(json!({ "error": err.to_string(), "kind": err.kind() })),
    )
        .into_response()
}

/// Readiness check: 200 when healthy, 503 when degraded.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let report = state.service.health(Utc::now()).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.status(Utc::now()).await).into_response()
}

/// Run one follow-up cycle now and return its summary.
async fn trigger_cycle(State(state): State<Arc<AppState>>) -> Response {
    match state.service.trigger_cycle().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e @ LeadflowError::CycleInProgress) => error_response(StatusCode::CONFLICT, &e),
        Err(e @ LeadflowError::LeadSource(_)) => {
            tracing::error!(error = %e, "Manual cycle failed");
            error_response(StatusCode::BAD_GATEWAY, &e)
        }
        Err(e) => {
            tracing::error!(error = %e, "Manual cycle failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

async fn flush_batch(State(state): State<Arc<AppState>>) -> Response {
    match state.service.flush_batch().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Batch flush failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// Drain the primary queue and every due retry.
async fn drain_queues(State(state): State<Arc<AppState>>) -> Response {
    let now = Utc::now();
    let primary = state.service.drain_primary(now).await;
    let retry = state.service.drain_retries(now).await;
    Json(json!({ "primary": primary, "retry": retry })).into_response()
}
