//! Job submission and status handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use vtx_models::{JobId, JobStatusView};
use vtx_storage::keys;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    /// URI the frame extractor can read
    #[validate(length(min = 1, max = 2048))]
    pub source_uri: String,
    /// Declared video length in seconds, at most 24 hours
    #[validate(range(exclusive_min = 0.0, max = 86_400.0))]
    pub declared_duration_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub view: JobStatusView,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub is_terminal: bool,
}

impl From<JobStatusView> for JobStatusResponse {
    fn from(view: JobStatusView) -> Self {
        Self {
            progress: view.progress_percent(),
            is_terminal: view.is_terminal(),
            view,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArtifactsResponse {
    pub job_id: String,
    /// One reference per sealed segment, in segment order
    pub artifacts: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/jobs
///
/// Returns:
/// - 202: Job queued
/// - 400: Empty source or non-positive duration
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    request.validate()?;

    let job_id = state
        .jobs
        .submit_job(&request.source_uri, request.declared_duration_secs)
        .await?;
    metrics::record_job_submitted();
    info!("create_job job_id={} duration={}", job_id, request.declared_duration_secs);

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateJobResponse {
            job_id: job_id.to_string(),
            status: "queued".to_string(),
        }),
    ))
}

/// GET /api/jobs/:job_id
///
/// Returns:
/// - 200: Stage, per-segment progress and any recorded error
/// - 404: Job not found
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(job_id)?;
    let view = state
        .jobs
        .get_job_status(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))?;
    Ok(Json(view.into()))
}

/// GET /api/jobs/:job_id/artifacts
pub async fn list_job_artifacts(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ArtifactsResponse>> {
    let job_id = parse_job_id(job_id)?;
    let artifacts = state
        .jobs
        .list_artifacts(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))?;
    Ok(Json(ArtifactsResponse {
        job_id: job_id.to_string(),
        artifacts,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_job_id(raw: String) -> ApiResult<JobId> {
    keys::validate_id(&raw).map_err(|_| ApiError::bad_request("Invalid job ID format"))?;
    Ok(JobId::from_string(raw))
}
