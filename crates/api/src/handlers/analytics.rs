use axum::extract::{Query, State};
use axum::Json;
use engine::{AnalyticsWindow, PerformanceReport};
use serde::Deserialize;

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub window: Option<String>,
}

pub async fn report(
    Query(query): Query<AnalyticsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PerformanceReport>, ApiError> {
    let window = match query.window.as_deref() {
        Some(raw) => raw
            .parse::<AnalyticsWindow>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => AnalyticsWindow::default(),
    };
    Ok(Json(state.engine.get_performance_analytics(window)?))
}
