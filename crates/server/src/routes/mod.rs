//! API route handlers for the bidsify server.

pub mod health;
pub mod jobs;
pub mod logs;
pub mod metrics;
pub mod run;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/ping - Liveness probe
/// - POST /api/jobs - Start a background job
/// - GET  /api/jobs - List jobs
/// - GET  /api/jobs/{id} - Job status
/// - GET  /api/jobs/{id}/artifacts - Result file paths
/// - GET  /api/jobs/{id}/artifact?index=N - Download a result file
/// - WS   /api/jobs/{id}/logs - Backlog plus live log lines (also /ws/jobs/{id}/logs)
/// - POST /api/run, /api/analyze, /api/report - Run and wait for the result
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", logs::router())
        .nest("/api", run::router())
        .nest("/ws", logs::router())
        .merge(metrics::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsify_core::ToolLocator;

    #[test]
    fn test_api_routes_creation() {
        let state = AppState::with_tool(ToolLocator::default());
        let _router = api_routes(state);
    }
}
