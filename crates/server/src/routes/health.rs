// crates/server/src/routes/health.rs
//! Health check endpoints for the API.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Response for the health check endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub jobs: usize,
}

/// Response for the liveness probe.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PingResponse {
    pub ok: bool,
}

/// GET /api/health - Health check endpoint.
///
/// Returns server status, version, uptime and the number of known jobs.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        jobs: state.registry.len(),
    })
}

/// GET /api/ping - Liveness probe used by the web UI.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { ok: true })
}

/// Create the health routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ping", get(ping))
}
