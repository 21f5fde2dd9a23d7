// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! API Surface
//!
//! Bearer-authenticated axum routes for submit / poll / report / status.
//! Error kinds from the lower layers become HTTP status codes here and
//! nowhere else.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::application::{PlanRequest, Planner, ResultHandler, Scheduler};
use crate::domain::audit::{AuditReport, ReworkDirective};
use crate::domain::config::ConductorConfig;
use crate::domain::result::WorkerReport;
use crate::domain::store::{Store, StoreError};
use crate::domain::task::{Role, TaskStep};
use crate::domain::workflow::WorkflowStatus;

use super::auth::require_bearer;

// ============================================================================
// State & error mapping
// ============================================================================

pub struct AppState {
    pub config: Arc<ConductorConfig>,
    pub auth_token: String,
    pub store: Arc<dyn Store>,
    pub planner: Planner,
    pub scheduler: Scheduler,
    pub result_handler: ResultHandler,
}

impl AppState {
    /// Wire the services together over a store and a gateway.
    pub fn build(
        config: Arc<ConductorConfig>,
        store: Arc<dyn Store>,
        gateway: Arc<crate::infrastructure::LlmGateway>,
    ) -> anyhow::Result<Arc<Self>> {
        let auth_token = config.resolve_auth_token()?;
        let locks = Arc::new(crate::application::LockService::new(
            store.clone(),
            config.clone(),
        ));
        let scheduler = Scheduler::new(store.clone(), locks, config.clone());
        let auditor = Arc::new(crate::application::Auditor::new(
            gateway.clone(),
            config.clone(),
        ));
        let result_handler = ResultHandler::new(store.clone(), auditor, config.clone());
        let planner = Planner::new(store.clone(), gateway, config.clone());
        Ok(Arc::new(Self {
            config,
            auth_token,
            store,
            planner,
            scheduler,
            result_handler,
        }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };
        if matches!(self, ApiError::Unavailable(_)) {
            error!("request failed: {}", self);
        }
        let body = ErrorBody {
            error,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(m) => ApiError::NotFound(m),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::InvalidPlan(m) => ApiError::Unprocessable(m),
            StoreError::Unavailable(m) => ApiError::Unavailable(m),
        }
    }
}

// ============================================================================
// Wire models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub user_request: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub workflow_id: String,
    pub name: String,
    pub tasks: Vec<TaskStep>,
    pub created_at: DateTime<Utc>,
    pub total_tasks: usize,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub role: String,
    pub worker_id: String,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub accepted: bool,
    pub workflow_status: Option<WorkflowStatus>,
    pub audit_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub directives: Vec<ReworkDirective>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub reset_steps: Vec<String>,
    pub rework_cycles: u32,
}

#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub workflow_id: String,
    pub artifact: String,
}

#[derive(Debug, Serialize)]
pub struct WorkerTaskView {
    pub workflow_id: String,
    pub step_id: String,
    pub description: String,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct WorkersStatusResponse {
    pub worker_tasks: HashMap<String, WorkerTaskView>,
    pub total_active: usize,
}

// ============================================================================
// Router
// ============================================================================

pub fn app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/tasks", post(submit_task))
        .route("/v1/tasks/ready", get(poll_ready_task))
        .route("/v1/results", post(report_result))
        .route("/v1/workflows/:id/status", get(workflow_status))
        .route("/v1/workflows/:id/result", get(workflow_result))
        .route("/v1/workflows/:id/audit", get(workflow_audits))
        .route("/v1/workflows/:id/reset", post(reset_workflow))
        .route("/v1/projects/:id/status", get(project_status))
        .route("/v1/workers/status", get(workers_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/health/readiness", get(readiness))
        .merge(protected)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a user request; plans synchronously and returns the persisted
/// graph. Planning failures degrade to the fallback plan inside the planner,
/// so the only errors left here are store errors.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if body.user_request.trim().is_empty() {
        return Err(ApiError::BadRequest("user_request must not be empty".into()));
    }

    let (workflow, tasks) = state
        .planner
        .plan_and_save(PlanRequest {
            user_request: body.user_request,
            metadata: body.metadata,
            project_id: body.project_id,
        })
        .await?;

    let total_tasks = tasks.len();
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            workflow_id: workflow.workflow_id,
            name: workflow.name,
            tasks,
            created_at: workflow.created_at,
            total_tasks,
        }),
    ))
}

/// Worker poll: the atomic claim. Non-idempotent; 204 when nothing is
/// dispatchable.
async fn poll_ready_task(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PollQuery>,
) -> Result<Response, ApiError> {
    if query.worker_id.trim().is_empty() {
        return Err(ApiError::BadRequest("worker_id must not be empty".into()));
    }
    let role = query.role.trim().to_ascii_lowercase();
    if !state.config.is_known_role(&role) {
        return Err(ApiError::BadRequest(format!("unknown role: {}", query.role)));
    }

    match state
        .scheduler
        .poll(&Role::new(role), query.worker_id.trim())
        .await?
    {
        Some(task) => Ok(Json(task).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Worker report ingestion. A stale claim answers 409 with
/// `accepted: false` so the worker can drop the task without retrying.
async fn report_result(
    State(state): State<Arc<AppState>>,
    Json(report): Json<WorkerReport>,
) -> Result<Response, ApiError> {
    match state.result_handler.handle_report(report).await {
        Ok(ack) => Ok(Json(ResultResponse {
            accepted: ack.accepted,
            workflow_status: Some(ack.workflow_status),
            audit_triggered: ack.audit_triggered,
            reason: None,
        })
        .into_response()),
        Err(StoreError::Conflict(reason)) => Ok((
            StatusCode::CONFLICT,
            Json(ResultResponse {
                accepted: false,
                workflow_status: None,
                audit_triggered: false,
                reason: Some(reason),
            }),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

async fn workflow_status(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Response, ApiError> {
    let view = state.store.workflow_status_view(&workflow_id).await?;
    Ok(Json(view).into_response())
}

/// The synthesized artifact, available once the workflow finalized.
async fn workflow_result(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.store.workflow_artifact(&workflow_id).await? {
        Some(artifact) => Ok(Json(ArtifactResponse {
            workflow_id,
            artifact,
        })
        .into_response()),
        None => Err(ApiError::NotFound(format!(
            "workflow {} is not finalized",
            workflow_id
        ))),
    }
}

async fn workflow_audits(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Vec<AuditReport>>, ApiError> {
    Ok(Json(state.store.list_audits(&workflow_id).await?))
}

/// Admin rework reset: same store path as an audit-triggered reset.
async fn reset_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    Json(body): Json<ResetRequest>,
) -> Result<Json<ResetResponse>, ApiError> {
    if body.directives.is_empty() {
        return Err(ApiError::BadRequest("directives must not be empty".into()));
    }
    let outcome = state
        .store
        .reset_tasks_for_rework(&workflow_id, &body.directives)
        .await?;
    Ok(Json(ResetResponse {
        reset_steps: outcome.reset_steps,
        rework_cycles: outcome.rework_cycles,
    }))
}

async fn project_status(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Response, ApiError> {
    let view = state.store.project_status_view(&project_id).await?;
    Ok(Json(view).into_response())
}

async fn workers_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<WorkersStatusResponse>, ApiError> {
    let in_progress = state.store.in_progress_tasks().await?;
    let mut worker_tasks = HashMap::new();
    for t in in_progress {
        if let Some(worker) = &t.claimed_by {
            worker_tasks.insert(
                worker.clone(),
                WorkerTaskView {
                    workflow_id: t.workflow_id.clone(),
                    step_id: t.step_id.clone(),
                    description: t.description.clone(),
                    claimed_at: t.claimed_at,
                },
            );
        }
    }
    let total_active = worker_tasks.len();
    Ok(Json(WorkersStatusResponse {
        worker_tasks,
        total_active,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "conductor",
    }))
}

async fn readiness(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.ping().await?;
    Ok(Json(serde_json::json!({
        "status": "ready",
        "store": "reachable",
    })))
}
