use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use engine::ExecutionRecord;
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub workflow_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// Start a run now. The response carries the `Queued` record; poll
/// `/executions/{id}` for the outcome.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ExecutionRecord>), ApiError> {
    let record = state.engine.execute_workflow_now(id)?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub async fn list(
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    let history = state
        .engine
        .get_execution_history(query.workflow_id, query.limit)?;
    Ok(Json(history))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    Ok(Json(state.engine.get_execution(id)?))
}
