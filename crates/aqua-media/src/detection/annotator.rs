//! Frame annotators.
//!
//! An [`Annotator`] turns a raw frame into an annotated frame of the same
//! size. Failures are returned per frame so the caller can decide whether to
//! carry on with a previous result or stop.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use super::object_detector::{ObjectDetector, ObjectDetectorConfig};
use super::overlay::{draw_detections, label_text, OverlayStyle};
use crate::error::MediaResult;
use crate::frame::Frame;
use crate::metrics;

/// Annotation of a single frame failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("annotation failed on frame {frame_index}: {message}")]
pub struct AnnotationFailure {
    pub frame_index: u64,
    pub message: String,
}

impl AnnotationFailure {
    pub fn new(frame_index: u64, message: impl Into<String>) -> Self {
        Self {
            frame_index,
            message: message.into(),
        }
    }
}

/// Outcome of annotating one frame.
pub type AnnotationResult = Result<Frame, AnnotationFailure>;

/// Produces annotated frames from raw frames.
///
/// Implementations must return a frame with the same index and dimensions
/// as the input.
pub trait Annotator: Send + Sync {
    /// Annotate one frame.
    fn annotate(&self, frame: &Frame) -> AnnotationResult;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

impl<T: Annotator + ?Sized> Annotator for Arc<T> {
    fn annotate(&self, frame: &Frame) -> AnnotationResult {
        (**self).annotate(frame)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Annotator that runs a YOLO detector and draws its boxes.
pub struct YoloAnnotator {
    detector: ObjectDetector,
    style: Option<OverlayStyle>,
}

impl YoloAnnotator {
    /// Load the model described by `config`.
    pub fn new(config: ObjectDetectorConfig) -> MediaResult<Self> {
        Ok(Self::from_detector(ObjectDetector::new(config)?))
    }

    /// Wrap an already loaded detector.
    pub fn from_detector(detector: ObjectDetector) -> Self {
        Self {
            detector,
            style: None,
        }
    }

    /// Use a fixed overlay style instead of one scaled to each frame.
    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// The underlying detector.
    pub fn detector(&self) -> &ObjectDetector {
        &self.detector
    }
}

impl Annotator for YoloAnnotator {
    fn annotate(&self, frame: &Frame) -> AnnotationResult {
        let started = Instant::now();
        let detections = self.detector.detect(frame);
        metrics::record_detection(started.elapsed().as_secs_f64(), detections.is_ok());

        let detections =
            detections.map_err(|e| AnnotationFailure::new(frame.index, e.to_string()))?;

        let class_names = &self.detector.config().class_names;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let labels: Vec<String> = detections
                .iter()
                .map(|d| label_text(d, class_names))
                .collect();
            debug!(frame = frame.index, detections = ?labels, "Frame annotated");
        }

        let style = self
            .style
            .clone()
            .unwrap_or_else(|| OverlayStyle::for_frame(frame.width, frame.height));

        let mut annotated = frame.clone();
        draw_detections(&mut annotated, &detections, class_names, &style)
            .map_err(|e| AnnotationFailure::new(frame.index, e.to_string()))?;
        Ok(annotated)
    }

    fn name(&self) -> &'static str {
        "yolo"
    }
}
