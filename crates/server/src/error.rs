// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bidsify_core::JobError;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../web/types/"))]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Artifact file missing: {0}")]
    ArtifactMissing(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(job_err) => match job_err {
                JobError::NotFound(id) => {
                    tracing::warn!(job_id = %id, "Job not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
                    )
                }
                JobError::ArtifactIndexOutOfRange { index, len } => {
                    tracing::warn!(index, len, "Artifact index out of range");
                    (
                        StatusCode::BAD_REQUEST,
                        ErrorResponse::with_details("Invalid artifact index", job_err.to_string()),
                    )
                }
                JobError::InvalidTransition { id, from, to } => {
                    tracing::warn!(job_id = %id, %from, %to, "Invalid job transition");
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_details("Conflict", job_err.to_string()),
                    )
                }
                JobError::Config(config_err) => {
                    tracing::error!(error = %config_err, "Configuration file error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Configuration file error", config_err.to_string()),
                    )
                }
                JobError::Launch { program, source } => {
                    tracing::error!(program = %program, error = %source, "Launch error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Failed to launch tool", job_err.to_string()),
                    )
                }
            },
            ApiError::ArtifactMissing(path) => {
                tracing::warn!(path = %path, "Artifact file missing on disk");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Artifact not found", path.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
