//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; whichever recorder the binary
//! installs (Prometheus in the API server) picks them up. Without a recorder
//! every call is a no-op.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "aqua_frames_processed_total";
    pub const DETECTIONS_RUN_TOTAL: &str = "aqua_detections_run_total";
    pub const DETECTION_FAILURES_TOTAL: &str = "aqua_detection_failures_total";
    pub const DETECTION_DURATION_SECONDS: &str = "aqua_detection_duration_seconds";
    pub const PIPELINE_DURATION_SECONDS: &str = "aqua_pipeline_duration_seconds";
}

/// Record one frame written to the output.
pub fn record_frame_written() {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
}

/// Record one detection pass and its latency.
pub fn record_detection(duration_secs: f64, success: bool) {
    counter!(names::DETECTIONS_RUN_TOTAL).increment(1);
    histogram!(names::DETECTION_DURATION_SECONDS).record(duration_secs);
    if !success {
        counter!(names::DETECTION_FAILURES_TOTAL).increment(1);
    }
}

/// Record a finished pipeline run.
pub fn record_pipeline_run(duration_secs: f64, outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    histogram!(names::PIPELINE_DURATION_SECONDS, &labels).record(duration_secs);
}
