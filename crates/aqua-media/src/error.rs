//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Decoding failed: {message}")]
    DecodeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("Encoding failed: {message}")]
    EncodeFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Object detection failed: {0}")]
    DetectionFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreadable, unsupported or oversized upload
    Input,
    /// Detector failure
    Inference,
    /// Encoder could not be opened or written
    Output,
    /// Stopped on request
    Cancelled,
    /// Anything else (missing tools, IO, bugs)
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Input => "input",
            ErrorCategory::Inference => "inference",
            ErrorCategory::Output => "output",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl MediaError {
    /// Create a detection failure error.
    pub fn detection_failed(message: impl Into<String>) -> Self {
        Self::DetectionFailed(message.into())
    }

    /// Create a decoder failure error.
    pub fn decode_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
            stderr,
        }
    }

    /// Create an encoder failure error.
    pub fn encode_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::EncodeFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::DecodeFailed { .. }
            | MediaError::FileNotFound(_)
            | MediaError::InvalidVideo(_)
            | MediaError::UnsupportedFormat(_)
            | MediaError::ResourceLimit(_) => ErrorCategory::Input,
            MediaError::DetectionFailed(_) => ErrorCategory::Inference,
            MediaError::EncoderUnavailable(_) | MediaError::EncodeFailed { .. } => {
                ErrorCategory::Output
            }
            MediaError::Cancelled => ErrorCategory::Cancelled,
            MediaError::FfmpegNotFound
            | MediaError::FfprobeNotFound
            | MediaError::Io(_)
            | MediaError::JsonParse(_)
            | MediaError::ModelNotFound(_)
            | MediaError::InvalidConfig(_)
            | MediaError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the error was caused by the uploaded file.
    pub fn is_input_error(&self) -> bool {
        self.category() == ErrorCategory::Input
    }

    /// Message suitable for showing to the person who uploaded the video.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Input => format!(
                "Could not open the video. Make sure the format is supported. ({})",
                self
            ),
            ErrorCategory::Inference => format!("Object detection failed: {}", self),
            ErrorCategory::Output => format!(
                "Could not write the annotated video on this host. ({})",
                self
            ),
            ErrorCategory::Cancelled => "Processing was cancelled".to_string(),
            ErrorCategory::Internal => format!("Processing failed: {}", self),
        }
    }
}
