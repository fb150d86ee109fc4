//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Runs (`/api/runs`, `/api/runs/:id`, close/abort/fail/reconcile)
//! - Task batches and polling (`/api/runs/:id/tasks`, `/api/runs/:id/tasks/start`)
//! - Leader election (`/api/runs/:id/leader`)
//! - Task outcomes (`/api/tasks/:id/complete`, `/api/tasks/:id/fail`)
//! - Health check (`/health`)

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Runs
        .route("/api/runs", post(handlers::create_run))
        .route("/api/runs/:id", get(handlers::get_run))
        .route("/api/runs/:id/tasks", post(handlers::create_tasks))
        .route("/api/runs/:id/tasks/start", put(handlers::start_task))
        .route("/api/runs/:id/close", put(handlers::close_run))
        .route("/api/runs/:id/abort", put(handlers::abort_run))
        .route("/api/runs/:id/fail", put(handlers::fail_run))
        .route("/api/runs/:id/leader", put(handlers::set_leader))
        .route("/api/runs/:id/reconcile", put(handlers::reconcile_run))
        // Tasks
        .route("/api/tasks/:id/complete", put(handlers::complete_task))
        .route("/api/tasks/:id/fail", put(handlers::fail_task))
        // Observability
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
