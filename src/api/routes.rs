use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Job submission
        .route("/recommendation", post(handlers::submit_job))
        // Job polling: the id may arrive in the path, the query string, or the body
        .route(
            "/recommendation/status/:job_id",
            get(handlers::job_status_by_path),
        )
        .route(
            "/recommendation/status",
            get(handlers::job_status_by_query).post(handlers::job_status_by_body),
        )
        .with_state(state)
}
