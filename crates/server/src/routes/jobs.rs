// crates/server/src/routes/jobs.rs
//! API routes for asynchronous tool jobs.
//!
//! - POST /jobs - Start a job in the background
//! - GET  /jobs - List all known jobs
//! - GET  /jobs/{id} - Job status summary
//! - GET  /jobs/{id}/artifacts - Result files the job produced
//! - GET  /jobs/{id}/artifact?index=N - Download one result file

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bidsify_core::{JobAction, JobDetail, JobId, JobSummary};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /api/jobs`.
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// YAML configuration handed to the tool verbatim.
    #[serde(alias = "config_yaml")]
    pub config_text: String,
    #[serde(default)]
    pub action: JobAction,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ArtifactsResponse {
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactQuery {
    #[serde(default)]
    pub index: usize,
}

/// POST /api/jobs - Write the config, register the job and start it.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<Json<CreateJobResponse>> {
    let job_id = state.runner.submit(&request.config_text, request.action)?;
    Ok(Json(CreateJobResponse { job_id }))
}

/// GET /api/jobs - All jobs, oldest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.registry.list(),
    })
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobDetail>> {
    Ok(Json(state.registry.detail(&JobId::from(job_id))?))
}

/// GET /api/jobs/{id}/artifacts
async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ArtifactsResponse>> {
    let snapshot = state.registry.get(&JobId::from(job_id))?;
    Ok(Json(ArtifactsResponse {
        artifacts: snapshot.artifacts,
    }))
}

/// GET /api/jobs/{id}/artifact?index=N - Stream the file as an attachment.
async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<ArtifactQuery>,
) -> ApiResult<Response> {
    let path = state.registry.artifact(&JobId::from(job_id), query.index)?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::ArtifactMissing(path.display().to_string()));
        }
        Err(e) => {
            return Err(ApiError::Internal(format!(
                "failed to open {}: {e}",
                path.display()
            )));
        }
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "artifact".to_string());

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/artifacts", get(list_artifacts))
        .route("/jobs/{id}/artifact", get(download_artifact))
}
