//! HTTP API: workflow submission, Action/workflow reads, and a presentational
//! dashboard-progress endpoint (spec §9 Open Question: progress percentages
//! are presentational only, not contractually specified — see DESIGN.md).

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use semflow_core::action::{Action, ActionStatus};
use semflow_core::job::Job;
use semflow_core::repository::{ActionRepository, RepositoryError};
use semflow_core::scheduler;
use semflow_core::workflow::Workflow;
use semflow_handlers::{MultipartIngress, MultipartIngressError};
use semflow_queue::JobQueue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

#[derive(Clone)]
pub struct AppState {
    pub action_repository: Arc<dyn ActionRepository>,
    pub queue: Arc<dyn JobQueue>,
}

#[derive(Deserialize)]
pub struct SubmitWorkflowRequest {
    /// The workflow's own `name` (stored on its `ItemList` root document).
    pub name: String,
    /// Variables available to `${...}` substitution across the workflow's Actions.
    #[serde(default)]
    pub query: Value,
    pub actions: Vec<Action>,
}

#[derive(Serialize)]
pub struct SubmitWorkflowResponse {
    pub workflow_id: String,
    pub enqueued: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message.into() }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", post(submit_workflow))
        .route("/v1/workflows/:workflow_id", get(get_workflow))
        .route("/v1/workflows/:workflow_id/actions/:action_id", get(get_action))
        .route("/v1/workflows/:workflow_id/actions", post(submit_multipart_action))
        .route("/v1/workflows/:workflow_id/progress", get(get_progress))
        .with_state(state)
}

/// Accepts a single Action plus accompanying files as `multipart/form-data`
/// (spec §4.8 "multipart ingress"). File bytes are not persisted by this
/// reference deployment (no blob store is wired in); only their names are
/// recorded, under `controlMetadata.files`, for downstream inspection.
#[instrument(skip(state, multipart))]
async fn submit_multipart_action(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let ingress = MultipartIngress::parse(multipart).await.map_err(|e| match e {
        MultipartIngressError::MissingAction | MultipartIngressError::InvalidAction(_) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        MultipartIngressError::Read(_) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    })?;

    let mut action = ingress.action;
    action.set_is_part_of(workflow_id.clone());
    if !ingress.files.is_empty() {
        let names: Vec<Value> = ingress.files.keys().map(|name| Value::String(name.clone())).collect();
        action.set_field("controlMetadata.files", Value::Array(names)).ok();
    }

    state
        .action_repository
        .put_action(&workflow_id, &action)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if action.status() == ActionStatus::PotentialActionStatus && action.requires().is_empty() {
        let job = Job::new(action.identifier(), "parallel", workflow_id.clone());
        if let Err(e) = state.queue.enqueue(job).await {
            error!(workflow_id = %workflow_id, action_id = action.identifier(), error = %e, "failed to enqueue multipart action");
        }
    }

    Ok(Json(action.to_value()))
}

/// Accepts a workflow's child Actions, rejects cycles in their `requires`
/// edges, persists the workflow root plus every child, then enqueues every
/// immediately-ready Action (spec §4.3/§8 "circular requires" boundary case).
#[instrument(skip(state, request))]
async fn submit_workflow(
    State(state): State<AppState>,
    Json(request): Json<SubmitWorkflowRequest>,
) -> Result<Json<SubmitWorkflowResponse>, (StatusCode, Json<ErrorResponse>)> {
    if let Err(cycle) = Action::detect_cycle(request.actions.iter()) {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("cycle detected among actions: {cycle:?}"),
        ));
    }

    let workflow_id = uuid::Uuid::new_v4().to_string();
    let mut workflow = Workflow::new(&workflow_id, &request.name);
    workflow.action_mut().set_field("query", request.query).ok();

    state
        .action_repository
        .put_action(&workflow_id, workflow.action())
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut actions = request.actions;
    for action in &mut actions {
        action.set_is_part_of(workflow_id.clone());
        state
            .action_repository
            .put_action(&workflow_id, action)
            .await
            .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }

    let ready = scheduler::ready_actions(&actions);
    let mut enqueued = 0;
    for action in ready {
        let queue_name = action
            .get_field("controlMetadata.queue")
            .ok()
            .and_then(Value::as_str)
            .unwrap_or("parallel")
            .to_string();
        let job = Job::new(action.identifier(), queue_name, workflow_id.clone());
        if let Err(e) = state.queue.enqueue(job).await {
            error!(workflow_id = %workflow_id, action_id = action.identifier(), error = %e, "failed to enqueue ready action");
            continue;
        }
        enqueued += 1;
    }

    info!(workflow_id = %workflow_id, actions = actions.len(), enqueued, "workflow submitted");
    Ok(Json(SubmitWorkflowResponse { workflow_id, enqueued }))
}

#[instrument(skip(state))]
async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let root = state
        .action_repository
        .get_action(&workflow_id, &workflow_id)
        .await
        .map_err(not_found_or_backend)?;
    let mut children = state
        .action_repository
        .list_actions(&workflow_id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    children.retain(|a| a.identifier() != workflow_id);

    Ok(Json(serde_json::json!({
        "workflow": root.to_value(),
        "actions": children.iter().map(Action::to_value).collect::<Vec<_>>(),
    })))
}

#[instrument(skip(state))]
async fn get_action(
    State(state): State<AppState>,
    Path((workflow_id, action_id)): Path<(String, String)>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let action = state
        .action_repository
        .get_action(&workflow_id, &action_id)
        .await
        .map_err(not_found_or_backend)?;
    Ok(Json(action.to_value()))
}

/// Presentational only: percent-complete is `completed / total` among child
/// Actions, rounded down. No downstream automation depends on this mapping
/// (spec §9 Open Question).
#[derive(Serialize)]
struct ProgressResponse {
    workflow_id: String,
    total: usize,
    completed: usize,
    failed: usize,
    percent_complete: u8,
}

#[instrument(skip(state))]
async fn get_progress(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ProgressResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut actions = state
        .action_repository
        .list_actions(&workflow_id)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    actions.retain(|a| a.identifier() != workflow_id);

    if actions.is_empty() {
        return Err(error_response(StatusCode::NOT_FOUND, format!("no workflow {workflow_id}")));
    }

    let total = actions.len();
    let completed = actions.iter().filter(|a| a.status() == ActionStatus::CompletedActionStatus).count();
    let failed = actions.iter().filter(|a| a.status() == ActionStatus::FailedActionStatus).count();
    let percent_complete = if total == 0 { 0 } else { ((completed * 100) / total) as u8 };

    Ok(Json(ProgressResponse { workflow_id, total, completed, failed, percent_complete }))
}

fn not_found_or_backend(err: RepositoryError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        RepositoryError::NotFound(id) => error_response(StatusCode::NOT_FOUND, format!("not found: {id}")),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse { version: env!("CARGO_PKG_VERSION") })
}
