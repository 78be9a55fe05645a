use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;

/// Health and job endpoints, without transport layers.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .with_state(state)
}
