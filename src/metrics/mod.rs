//! Metrics module
//!
//! Provides Prometheus metrics for the ingestion pipeline.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Histogram, HistogramVec,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "local_uploadr_uploads_total",
        "Total number of stored objects and failed uploads",
        &["route", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "local_uploadr_upload_bytes_total",
        "Total bytes committed to storage"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "local_uploadr_upload_duration_seconds",
        "Ingestion duration in seconds",
        &["route", "mode"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // Multi-file metrics
    pub static ref BATCH_PARTS: Histogram = register_histogram!(
        "local_uploadr_batch_parts",
        "Number of parts per multi-file upload",
        vec![0.0, 1.0, 2.0, 5.0, 10.0, 50.0, 100.0]
    ).unwrap();

    // Staging metrics
    pub static ref STAGING_DISCARDS: Counter = register_counter!(
        "local_uploadr_staging_discards_total",
        "Staging files removed without being published"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "local_uploadr_errors_total",
        "Total ingestion errors by kind",
        &["kind"]
    ).unwrap();
}

/// Record a committed object
pub fn record_upload_success(route: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[route, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload (or failed part of a multi-file upload)
pub fn record_upload_failure(route: &str, kind: &str) {
    UPLOADS_TOTAL.with_label_values(&[route, "failure"]).inc();
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record ingestion duration
pub fn record_upload_duration(route: &str, mode: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[route, mode])
        .observe(duration_secs);
}

/// Record the size of a multi-file upload
pub fn record_batch_parts(parts_count: usize) {
    BATCH_PARTS.observe(parts_count as f64);
}

/// Record a staging file discarded on a failure path
pub fn record_staging_discard() {
    STAGING_DISCARDS.inc();
}
