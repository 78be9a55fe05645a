use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::batch::{JobStatusResponse, SubmitBatchRequest, SubmitBatchResponse};
use crate::models::job::JobState;
use crate::routes::error::ApiError;

/// POST /api/v1/jobs: Submit a batch of product rows for processing.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitBatchRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitBatchResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidBatch(e.body_text()))?;

    let admitted = state.admission.submit(request.rows).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBatchResponse {
            job_id: admitted.job_id,
            status: JobState::Pending.to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: Current status and results of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    // Ids are opaque to clients; anything that is not one of ours is unknown.
    let id = Uuid::parse_str(&job_id).map_err(|_| ApiError::NotFound(job_id.clone()))?;

    let snapshot = state
        .results
        .query_by_job(id)
        .await?
        .ok_or(ApiError::NotFound(job_id))?;

    Ok(Json(JobStatusResponse::from(&snapshot)))
}
