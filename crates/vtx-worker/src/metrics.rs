//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use vtx_models::ErrorKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "vtx_frames_processed_total";
    pub const PAGES_SKIPPED_TOTAL: &str = "vtx_pages_skipped_total";
    pub const BATCHES_COMMITTED_TOTAL: &str = "vtx_batches_committed_total";
    pub const BATCH_DURATION_SECONDS: &str = "vtx_batch_duration_seconds";
    pub const BATCH_PEAK_BYTES: &str = "vtx_batch_peak_bytes";
    pub const RETRIES_TOTAL: &str = "vtx_retries_total";
    pub const ARTIFACTS_SEALED_TOTAL: &str = "vtx_artifacts_sealed_total";
    pub const JOB_OUTCOMES_TOTAL: &str = "vtx_job_outcomes_total";
    pub const JOBS_IN_FLIGHT: &str = "vtx_jobs_in_flight";
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn install_exporter(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
}

/// Record a committed batch.
pub fn record_batch(frames: u64, skipped: u64, duration_secs: f64, peak_bytes: u64) {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(frames);
    if skipped > 0 {
        counter!(names::PAGES_SKIPPED_TOTAL).increment(skipped);
    }
    counter!(names::BATCHES_COMMITTED_TOTAL).increment(1);
    histogram!(names::BATCH_DURATION_SECONDS).record(duration_secs);
    histogram!(names::BATCH_PEAK_BYTES).record(peak_bytes as f64);
}

/// Record a retried operation.
pub fn record_retry(operation: &str, kind: ErrorKind) {
    let labels = [
        ("operation", operation.to_string()),
        ("kind", kind.as_str().to_string()),
    ];
    counter!(names::RETRIES_TOTAL, &labels).increment(1);
}

pub fn record_artifact_sealed() {
    counter!(names::ARTIFACTS_SEALED_TOTAL).increment(1);
}

/// Record how a run ended (`completed`, `failed`, `manual_review`, ...).
pub fn record_job_outcome(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::JOB_OUTCOMES_TOTAL, &labels).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}
