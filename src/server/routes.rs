//! Router configuration for the trigger API.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::api_status))
        .route("/api/batches", post(handlers::start_batch))
        .route("/api/batches/:job_id", get(handlers::batch_status))
        .with_state(state)
}
