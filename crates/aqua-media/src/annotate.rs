//! End-to-end video annotation.
//!
//! Validates the upload, opens the decoder and encoder, runs the pipeline
//! driver and closes everything down. On any failure the partially written
//! output is deleted, so a returned error never leaves an output file behind.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::decoder::FrameReader;
use crate::detection::Annotator;
use crate::encoder::{EncoderSettings, FrameWriter};
use crate::error::{MediaError, MediaResult};
use crate::limits::InputLimits;
use crate::pipeline::{PipelineConfig, PipelineDriver, PipelineReport};
use crate::probe::VideoInfo;
use crate::progress::ProgressSender;

/// Everything needed to annotate one video.
#[derive(Debug, Clone)]
pub struct AnnotateRequest {
    /// Uploaded video
    pub input: PathBuf,
    /// Where the annotated MP4 is written
    pub output: PathBuf,
    pub pipeline: PipelineConfig,
    pub encoder: EncoderSettings,
    pub limits: InputLimits,
}

impl AnnotateRequest {
    /// Request with default pipeline, encoder and limits.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            pipeline: PipelineConfig::default(),
            encoder: EncoderSettings::default(),
            limits: InputLimits::default(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_encoder(mut self, encoder: EncoderSettings) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_limits(mut self, limits: InputLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Result of a successful annotation.
#[derive(Debug, Clone)]
pub struct AnnotateOutcome {
    pub output: PathBuf,
    /// Source stream metadata, also used for the output
    pub info: VideoInfo,
    pub report: PipelineReport,
    pub elapsed: Duration,
}

/// Annotate `request.input` into `request.output`.
pub async fn annotate_video<A: Annotator>(
    request: &AnnotateRequest,
    annotator: A,
    progress: ProgressSender,
    cancel: watch::Receiver<bool>,
) -> MediaResult<AnnotateOutcome> {
    let started = Instant::now();

    let mut driver = PipelineDriver::new(annotator, request.pipeline.clone())?
        .with_progress(progress.clone())
        .with_cancellation(cancel);

    if let Err(e) = request.limits.validate_file(&request.input).await {
        progress.failed(e.to_string());
        return Err(e);
    }

    let (info, mut reader) = match FrameReader::open(&request.input).await {
        Ok(opened) => opened,
        Err(e) => {
            progress.failed(e.to_string());
            return Err(e);
        }
    };

    if let Err(e) = request.limits.validate_stream(&info) {
        reader.kill().await;
        progress.failed(e.to_string());
        return Err(e);
    }

    info!(
        input = %request.input.display(),
        width = info.width,
        height = info.height,
        fps = info.fps,
        frames = info.frame_count,
        sample_interval = request.pipeline.sample_interval,
        "Annotating video"
    );

    let mut writer = match FrameWriter::open(&request.output, &info, &request.encoder).await {
        Ok(writer) => writer,
        Err(e) => {
            reader.kill().await;
            progress.failed(e.to_string());
            return Err(e);
        }
    };

    let report = match driver.run(&mut reader, &mut writer, info.frame_count).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "Pipeline stopped, discarding partial output");
            writer.abort().await;
            reader.kill().await;
            return Err(e);
        }
    };

    let frames_read = reader.frames_read();
    if let Err(e) = reader.finish().await {
        writer.abort().await;
        progress.failed(e.to_string());
        return Err(e);
    }

    let frames_written = writer.frames_written();
    if frames_written != frames_read {
        writer.abort().await;
        let e = MediaError::internal(format!(
            "wrote {} frames but decoded {}",
            frames_written, frames_read
        ));
        progress.failed(e.to_string());
        return Err(e);
    }

    let output = match writer.finish().await {
        Ok(path) => path,
        Err(e) => {
            progress.failed(e.to_string());
            return Err(e);
        }
    };

    let elapsed = started.elapsed();
    info!(
        output = %output.display(),
        frames = report.frames_written,
        detection_failures = report.detection_failures,
        elapsed_ms = elapsed.as_millis() as u64,
        "Annotated video written"
    );

    Ok(AnnotateOutcome {
        output,
        info,
        report,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::AnnotationResult;
    use crate::frame::Frame;

    struct Passthrough;

    impl Annotator for Passthrough {
        fn annotate(&self, frame: &Frame) -> AnnotationResult {
            Ok(frame.clone())
        }

        fn name(&self) -> &'static str {
            "passthrough"
        }
    }

    #[tokio::test]
    async fn test_empty_upload_is_input_error_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("empty.mp4");
        let output = dir.path().join("detected.mp4");
        tokio::fs::write(&input, b"").await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let err = annotate_video(
            &AnnotateRequest::new(&input, &output),
            Passthrough,
            ProgressSender::noop(),
            rx,
        )
        .await
        .unwrap_err();

        assert!(err.is_input_error());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        let output = dir.path().join("detected.mp4");
        tokio::fs::write(&input, b"not a video").await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let err = annotate_video(
            &AnnotateRequest::new(&input, &output),
            Passthrough,
            ProgressSender::noop(),
            rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_invalid_interval_rejected_before_io() {
        let (_tx, rx) = watch::channel(false);
        let request = AnnotateRequest::new("/nonexistent/in.mp4", "/nonexistent/out.mp4")
            .with_pipeline(PipelineConfig {
                sample_interval: 0,
                ..Default::default()
            });

        let err = annotate_video(&request, Passthrough, ProgressSender::noop(), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidConfig(_)));
    }
}
