//! `api` crate — HTTP REST API over the automation engine.
//!
//! Exposes:
//!   GET    /api/v1/health
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   PATCH  /api/v1/workflows/{id}
//!   DELETE /api/v1/workflows/{id}
//!   POST   /api/v1/workflows/{id}/execute
//!   POST   /api/v1/workflows/{id}/pause
//!   POST   /api/v1/workflows/{id}/resume
//!   GET    /api/v1/workflows/{id}/stats
//!   GET    /api/v1/executions?workflow_id=&limit=
//!   GET    /api/v1/executions/{id}
//!   GET    /api/v1/control/status
//!   POST   /api/v1/control/pause-all
//!   POST   /api/v1/control/resume-all
//!   POST   /api/v1/control/emergency-stop
//!   POST   /api/v1/control/resume
//!   GET    /api/v1/analytics?window=24h

mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use engine::AutomationEngine;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutomationEngine>,
}

/// Build the router with all routes mounted under `/api/v1`.
pub fn router(engine: Arc<AutomationEngine>) -> Router {
    use handlers::{analytics, control, executions, workflows};

    let v1 = Router::new()
        .route("/health", get(control::health))
        .route("/workflows", get(workflows::list).post(workflows::create))
        .route(
            "/workflows/:id",
            get(workflows::get)
                .patch(workflows::update)
                .delete(workflows::delete),
        )
        .route("/workflows/:id/execute", post(executions::execute))
        .route("/workflows/:id/pause", post(workflows::pause))
        .route("/workflows/:id/resume", post(workflows::resume))
        .route("/workflows/:id/stats", get(workflows::stats))
        .route("/executions", get(executions::list))
        .route("/executions/:id", get(executions::get))
        .route("/control/status", get(control::status))
        .route("/control/pause-all", post(control::pause_all))
        .route("/control/resume-all", post(control::resume_all))
        .route("/control/emergency-stop", post(control::emergency_stop))
        .route("/control/resume", post(control::resume))
        .route("/analytics", get(analytics::report));

    Router::new()
        .nest("/api/v1", v1)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, engine: Arc<AutomationEngine>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(engine)).await
}
