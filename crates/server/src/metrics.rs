//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters, histograms)
//! - Helper functions for recording job metrics

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use bidsify_core::{JobAction, JobStatus};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobs_submitted_total", "Jobs registered, by action");
    describe_counter!(
        "jobs_finished_total",
        "Jobs that reached a terminal status, by action and status"
    );
    describe_histogram!(
        "job_duration_seconds",
        "Wall time from launch to terminal status in seconds"
    );
    describe_counter!(
        "log_subscribers_dropped_total",
        "Log observers disconnected for falling behind"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted(action: JobAction) {
    counter!("jobs_submitted_total", "action" => action.as_str()).increment(1);
}

/// Record a job reaching its terminal status.
///
/// # Arguments
/// * `action` - What the job ran
/// * `status` - `completed` or `failed`
/// * `duration` - Time spent between claim and termination
pub fn record_job_finished(action: JobAction, status: JobStatus, duration: Duration) {
    counter!(
        "jobs_finished_total",
        "action" => action.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
    histogram!("job_duration_seconds", "action" => action.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_subscriber_dropped() {
    counter!("log_subscribers_dropped_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_job_submitted(JobAction::Analyse);
        record_job_finished(JobAction::Run, JobStatus::Failed, Duration::from_millis(5));
        record_subscriber_dropped();
    }

    #[test]
    fn test_render_after_init() {
        init_metrics();
        record_job_submitted(JobAction::Report);
        let output = render_metrics().expect("metrics initialized");
        assert!(output.contains("jobs_submitted_total"));
    }
}
