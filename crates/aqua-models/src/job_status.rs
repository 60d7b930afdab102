//! Job status snapshots for progress polling.
//!
//! A `JobSnapshot` is the single source of truth the browser polls while a
//! video is being annotated: percentage, status text, frame counters and the
//! final error or detection-failure count.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Upload stored, waiting for a free pipeline slot
    #[default]
    Queued,
    /// Frames are being decoded, annotated and encoded
    Processing,
    /// Annotated video is ready for playback and download
    Completed,
    /// Job failed; no output is available
    Failed,
    /// Job was cancelled by the user
    Cancelled,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSnapshot {
    /// Unique job identifier
    pub job_id: JobId,
    /// Original upload filename, if the client sent one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// Current job status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Progress fraction in [0, 1]
    pub fraction: f64,
    /// Human-readable status line
    pub status_text: String,
    /// Frames written to the output so far
    pub frames_processed: u64,
    /// Total frames reported by the source stream
    pub total_frames: u64,
    /// Sampled frames whose detection failed and were filled from the cache
    pub detection_failures: u64,
    /// Error message if the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the snapshot was last updated
    pub updated_at: DateTime<Utc>,
    /// Sequence number for update ordering (monotonically increasing)
    pub event_seq: u64,
}

impl JobSnapshot {
    /// Create a snapshot for a freshly queued job.
    pub fn new(job_id: JobId, source_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            source_name,
            status: JobStatus::Queued,
            progress: 0,
            fraction: 0.0,
            status_text: "Waiting for a free slot...".into(),
            frames_processed: 0,
            total_frames: 0,
            detection_failures: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            event_seq: 0,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the job as started.
    pub fn start(&mut self, total_frames: u64) {
        self.status = JobStatus::Processing;
        self.total_frames = total_frames;
        self.status_text = "Processing video...".into();
        self.touch();
    }

    /// Record that `processed` frames out of `total` have been written.
    ///
    /// Progress never moves backwards and terminal snapshots are left untouched.
    pub fn record_frame(&mut self, processed: u64, total: u64, fraction: f64) {
        if self.is_terminal() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < self.fraction {
            return;
        }
        self.status = JobStatus::Processing;
        self.frames_processed = processed;
        self.total_frames = total;
        self.fraction = fraction;
        self.progress = (fraction * 100.0).floor() as u8;
        self.status_text = format!("Processing frame {}/{}...", processed, total);
        self.touch();
    }

    /// Mark the job as completed.
    pub fn complete(&mut self, frames_written: u64, detection_failures: u64) {
        self.status = JobStatus::Completed;
        self.frames_processed = frames_written;
        self.detection_failures = detection_failures;
        self.fraction = 1.0;
        self.progress = 100;
        self.status_text = if detection_failures > 0 {
            format!(
                "Detection complete! ({} sampled frames reused the previous result)",
                detection_failures
            )
        } else {
            "Detection complete!".into()
        };
        self.touch();
    }

    /// Mark the job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = JobStatus::Failed;
        self.status_text = format!("Failed: {}", error);
        self.error_message = Some(error);
        self.touch();
    }

    /// Mark the job as cancelled.
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.status_text = "Cancelled".into();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }
}
