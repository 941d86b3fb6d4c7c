//! HTTP server for the orchestrator.
//!
//! Provides endpoints for:
//! - Task submission and snapshots (`/v1/tasks`)
//! - Live task events over SSE (`/v1/tasks/{id}/events`)
//! - Executor progress reports (`/v1/reports`, `/v1.0/log/{kind}`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Dashboards are served from other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Task API
        .route("/v1/tasks", post(handlers::submit_task))
        .route("/v1/tasks/:task_id", get(handlers::get_task))
        .route("/v1/tasks/:task_id/events", get(handlers::task_events))
        // Executor callbacks
        .route("/v1/reports", post(handlers::post_report))
        .route("/v1.0/log/:kind", post(handlers::post_log))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
