//! Prometheus scrape endpoint for the job server.
//!
//! `GET /metrics` renders everything recorded through [`crate::metrics`]:
//! - `jobs_submitted_total{action}` - jobs registered per tool action
//! - `jobs_finished_total{action,status}` - jobs that reached `completed` or `failed`
//! - `job_duration_seconds{action}` - wall time from claim to terminal status
//! - `log_subscribers_dropped_total` - log observers cut off for falling behind

use std::sync::Arc;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::metrics::render_metrics;
use crate::state::AppState;

/// GET /metrics - Job counters and durations in Prometheus text format.
///
/// The recorder is installed by the binary at startup; until then (and in
/// tests that never install it) this answers 503.
pub async fn metrics_handler() -> Response {
    match render_metrics() {
        Some(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
    }
}

/// Mounted at the root rather than under `/api`, where scrapers expect it.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}
