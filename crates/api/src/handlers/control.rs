//! Global controls: bulk pause/resume and the emergency stop.

use axum::extract::State;
use axum::Json;
use engine::ControlStatus;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct Changed {
    pub changed: usize,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn status(State(state): State<AppState>) -> Json<ControlStatus> {
    Json(state.engine.control_status())
}

pub async fn pause_all(State(state): State<AppState>) -> Result<Json<Changed>, ApiError> {
    let changed = state.engine.pause_all_workflows()?;
    Ok(Json(Changed { changed }))
}

pub async fn resume_all(State(state): State<AppState>) -> Result<Json<Changed>, ApiError> {
    let changed = state.engine.resume_all_workflows()?;
    Ok(Json(Changed { changed }))
}

pub async fn emergency_stop(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let signalled = state.engine.emergency_stop()?;
    Ok(Json(json!({ "halted": true, "signalled": signalled })))
}

pub async fn resume(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let was_halted = state.engine.resume()?;
    Ok(Json(json!({ "halted": false, "was_halted": was_halted })))
}
