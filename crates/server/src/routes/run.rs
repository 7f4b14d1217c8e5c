// crates/server/src/routes/run.rs
//! Blocking tool invocations: the request waits for the job to finish.
//!
//! - POST /run
//! - POST /analyze (also /analyse)
//! - POST /report
//!
//! Each call is still registered as a job, so its logs and artifacts remain
//! reachable through the jobs API afterwards.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use bidsify_core::{JobAction, JobId, LogStream};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

/// Raw YAML configuration body.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(alias = "config_text")]
    pub config_yaml: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct RunResponse {
    pub job_id: JobId,
    pub success: bool,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn run_blocking(
    state: &AppState,
    action: JobAction,
    config: RawConfig,
) -> ApiResult<Json<RunResponse>> {
    let executed = state.runner.execute(&config.config_yaml, action).await?;
    let snapshot = executed.snapshot;
    Ok(Json(RunResponse {
        success: snapshot.returncode == Some(0),
        returncode: snapshot.returncode,
        stdout: snapshot.stream_text(LogStream::Stdout),
        stderr: snapshot.stream_text(LogStream::Stderr),
        cmd: executed.command.argv(),
        error: snapshot.error,
        job_id: snapshot.id,
    }))
}

/// POST /api/run
async fn run(
    State(state): State<Arc<AppState>>,
    Json(config): Json<RawConfig>,
) -> ApiResult<Json<RunResponse>> {
    run_blocking(&state, JobAction::Run, config).await
}

/// POST /api/analyze
async fn analyse(
    State(state): State<Arc<AppState>>,
    Json(config): Json<RawConfig>,
) -> ApiResult<Json<RunResponse>> {
    run_blocking(&state, JobAction::Analyse, config).await
}

/// POST /api/report
async fn report(
    State(state): State<Arc<AppState>>,
    Json(config): Json<RawConfig>,
) -> ApiResult<Json<RunResponse>> {
    run_blocking(&state, JobAction::Report, config).await
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(run))
        .route("/analyze", post(analyse))
        .route("/analyse", post(analyse))
        .route("/report", post(report))
}
