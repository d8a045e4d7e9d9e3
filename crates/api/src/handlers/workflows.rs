use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use engine::{NewWorkflow, WorkflowDefinition, WorkflowPatch, WorkflowStats};
use uuid::Uuid;

use crate::{ApiError, AppState};

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkflowDefinition>>, ApiError> {
    Ok(Json(state.engine.list_workflows()?))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    Ok(Json(state.engine.get_workflow(id)?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<NewWorkflow>,
) -> Result<(StatusCode, Json<WorkflowDefinition>), ApiError> {
    let workflow = state.engine.register_workflow(payload)?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn update(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(patch): Json<WorkflowPatch>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    Ok(Json(state.engine.update_workflow(id, patch)?))
}

pub async fn delete(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.engine.unregister_workflow(id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    Ok(Json(state.engine.set_workflow_paused(id, true)?))
}

pub async fn resume(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    Ok(Json(state.engine.set_workflow_paused(id, false)?))
}

pub async fn stats(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowStats>, ApiError> {
    Ok(Json(state.engine.get_workflow_stats(id)?))
}
