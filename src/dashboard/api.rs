//! HTTP surface of the dashboard: submission, status queries, and the
//! step catalog.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::errors::WorkflowError;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::state::lock_state;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitRequirementRequest {
    #[serde(default)]
    pub requirement: String,
}

#[derive(Deserialize)]
pub struct ActivityLogQuery {
    pub limit: Option<usize>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::AlreadyRunning => ApiError::Conflict(err.to_string()),
            WorkflowError::RequirementTooShort { .. }
            | WorkflowError::InvalidStep { .. }
            | WorkflowError::NothingToRestart => ApiError::BadRequest(err.to_string()),
            WorkflowError::UnknownStep(_) => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/submit-requirement", post(submit_requirement))
        .route("/api/workflow-status", get(workflow_status))
        .route("/api/activity-log", get(activity_log))
        .route("/api/modified-files", get(modified_files))
        .route("/api/steps", get(list_steps))
        .route("/health", get(health))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn submit_requirement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequirementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.submit(&req.requirement)?;
    Ok(Json(json!({
        "status": "success",
        "message": "Workflow started",
    })))
}

async fn workflow_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let s = lock_state(state.engine.state());
    Json(json!({
        "workflow_running": s.running,
        "current_step": s.current_step,
        "requirement": s.requirement,
    }))
}

async fn activity_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActivityLogQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    let logs = lock_state(state.engine.state()).recent_logs(limit);
    Json(json!({ "logs": logs }))
}

async fn modified_files(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let files = lock_state(state.engine.state()).modified_files().to_vec();
    Json(json!({ "files": files }))
}

async fn list_steps(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let steps: Vec<serde_json::Value> = state
        .engine
        .registry()
        .iter()
        .map(|step| json!({"id": step.id(), "name": step.name()}))
        .collect();
    Json(steps)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Tests ─────────────────────────────────────────────────────────────
