//! Sampling pipeline driver.
//!
//! Frames flow one at a time from a [`FrameSource`] to a [`FrameSink`].
//! Every Nth frame goes through the [`Annotator`]; the frames in between
//! repeat the most recent annotated frame so boxes stay on screen without
//! paying for inference on every frame.

use std::str::FromStr;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::decoder::FrameSource;
use crate::detection::Annotator;
use crate::encoder::FrameSink;
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::metrics;
use crate::progress::ProgressSender;

/// Default detection sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: u32 = 5;

/// What to do when the annotator fails on a sampled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log, count, and emit the previous annotated frame (or the raw frame
    /// when there is none yet).
    #[default]
    ReuseLast,
    /// Stop the pipeline with [`MediaError::DetectionFailed`].
    Abort,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::ReuseLast => "reuse_last",
            FailurePolicy::Abort => "abort",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse_last" | "reuse-last" | "reuse" => Ok(FailurePolicy::ReuseLast),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(MediaError::invalid_config(format!(
                "unknown inference failure policy '{}' (expected reuse_last or abort)",
                other
            ))),
        }
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Run detection on frames whose index is a multiple of this
    pub sample_interval: u32,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load settings from `SAMPLE_INTERVAL` and `INFERENCE_FAILURE_POLICY`.
    pub fn from_env() -> MediaResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("SAMPLE_INTERVAL") {
            config.sample_interval = raw.trim().parse().map_err(|_| {
                MediaError::invalid_config(format!("SAMPLE_INTERVAL has invalid value '{}'", raw))
            })?;
        }
        if let Ok(raw) = std::env::var("INFERENCE_FAILURE_POLICY") {
            config.failure_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MediaResult<()> {
        if self.sample_interval == 0 {
            return Err(MediaError::invalid_config(
                "sample interval must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Counters from one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Frames handed to the sink
    pub frames_written: u64,
    /// Annotator invocations
    pub detections_run: u64,
    /// Annotator invocations that failed
    pub detection_failures: u64,
    /// Frames emitted without any annotation
    pub raw_frames_emitted: u64,
    /// Frames emitted as a repeat of the cached annotated frame
    pub cached_frames_emitted: u64,
}

/// Drives frames from a source to a sink through an annotator.
pub struct PipelineDriver<A: Annotator> {
    annotator: A,
    config: PipelineConfig,
    progress: ProgressSender,
    cancel: Option<watch::Receiver<bool>>,
    /// Most recent successfully annotated frame of the current run
    last_annotated: Option<Frame>,
}

impl<A: Annotator> PipelineDriver<A> {
    /// Create a driver. Fails when the sample interval is 0.
    pub fn new(annotator: A, config: PipelineConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self {
            annotator,
            config,
            progress: ProgressSender::noop(),
            cancel: None,
            last_annotated: None,
        })
    }

    /// Report progress through `progress`.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = progress;
        self
    }

    /// Stop cooperatively once `cancel` turns true.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn annotator(&self) -> &A {
        &self.annotator
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Run the source to exhaustion, writing exactly one frame per input frame.
    ///
    /// `total_frames` is only used for progress reporting.
    pub async fn run<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        total_frames: u64,
    ) -> MediaResult<PipelineReport>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        self.last_annotated = None;
        let started = Instant::now();
        let result = self.run_frames(source, sink, total_frames).await;

        let outcome = match &result {
            Ok(_) => "completed",
            Err(MediaError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        metrics::record_pipeline_run(started.elapsed().as_secs_f64(), outcome);
        self.last_annotated = None;

        match &result {
            Ok(report) => {
                self.progress.complete(report.frames_written);
                info!(
                    frames = report.frames_written,
                    detections = report.detections_run,
                    failures = report.detection_failures,
                    annotator = self.annotator.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Pipeline finished"
                );
            }
            Err(e) => self.progress.failed(e.to_string()),
        }
        result
    }

    async fn run_frames<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        total_frames: u64,
    ) -> MediaResult<PipelineReport>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let interval = u64::from(self.config.sample_interval);
        let mut report = PipelineReport::default();
        let mut index: u64 = 0;

        self.progress.started(total_frames);

        loop {
            if self.is_cancelled() {
                info!(frames = report.frames_written, "Pipeline cancelled");
                return Err(MediaError::Cancelled);
            }

            let Some(frame) = source.next_frame().await? else {
                break;
            };

            if index % interval == 0 {
                report.detections_run += 1;
                match self.annotator.annotate(&frame) {
                    Ok(annotated) => {
                        sink.write_frame(&annotated).await?;
                        self.last_annotated = Some(annotated);
                    }
                    Err(failure) => match self.config.failure_policy {
                        FailurePolicy::Abort => {
                            return Err(MediaError::detection_failed(failure.to_string()));
                        }
                        FailurePolicy::ReuseLast => {
                            report.detection_failures += 1;
                            warn!(
                                frame = index,
                                error = %failure.message,
                                "Detection failed, reusing previous result"
                            );
                            self.progress.detection_failed(index, failure.message);
                            self.emit_held(&frame, sink, &mut report).await?;
                        }
                    },
                }
            } else {
                self.emit_held(&frame, sink, &mut report).await?;
            }

            index += 1;
            report.frames_written = index;
            metrics::record_frame_written();
            self.progress.frame(index, total_frames);
        }

        debug!(frames = index, "Source exhausted");
        Ok(report)
    }

    /// Emit the cached annotated frame, or `raw` when nothing is cached.
    async fn emit_held<K>(
        &self,
        raw: &Frame,
        sink: &mut K,
        report: &mut PipelineReport,
    ) -> MediaResult<()>
    where
        K: FrameSink + ?Sized,
    {
        match &self.last_annotated {
            Some(cached) => {
                report.cached_frames_emitted += 1;
                sink.write_frame(cached).await
            }
            None => {
                report.raw_frames_emitted += 1;
                sink.write_frame(raw).await
            }
        }
    }
}
