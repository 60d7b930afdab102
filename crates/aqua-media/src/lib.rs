#![deny(unreachable_patterns)]
//! Frame pipeline for annotating videos with object detections.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Raw-frame decoding and encoding through FFmpeg pipes
//! - YOLO-format ONNX object detection and box overlays
//! - A sampling pipeline driver that runs detection every Nth frame
//!   and holds the last annotation in between
//! - Progress events, cooperative cancellation and input limits

pub mod annotate;
pub mod command;
pub mod decoder;
pub mod detection;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod limits;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod workspace;

pub use annotate::{annotate_video, AnnotateOutcome, AnnotateRequest};
pub use command::{check_encoder, check_ffmpeg, check_ffprobe, FfmpegCommand};
pub use decoder::{FrameReader, FrameSource};
pub use detection::{
    draw_detections, AnnotationFailure, AnnotationResult, Annotator, ObjectDetection,
    ObjectDetector, ObjectDetectorConfig, OverlayStyle, YoloAnnotator,
};
pub use encoder::{EncoderSettings, FrameSink, FrameWriter};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use frame::Frame;
pub use limits::InputLimits;
pub use pipeline::{FailurePolicy, PipelineConfig, PipelineDriver, PipelineReport};
pub use probe::{probe_video, VideoInfo};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSender};
pub use workspace::JobWorkspace;
