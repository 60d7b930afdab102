//! Runs uploaded videos through the annotation pipeline.
//!
//! Each job waits for a slot on a shared semaphore, then runs the pipeline on
//! the blocking pool since detection is CPU-bound. Progress events are folded
//! into the job snapshot by a separate task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use aqua_media::progress::{self, ProgressEvent, ProgressReceiver};
use aqua_media::{annotate_video, AnnotateRequest, Annotator, MediaError};

use crate::config::PipelineSettings;
use crate::metrics;
use crate::services::job_logger::JobLogger;
use crate::services::job_registry::JobHandle;

/// Schedules and executes annotation jobs.
pub struct JobRunner {
    annotator: Arc<dyn Annotator>,
    settings: PipelineSettings,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
}

impl JobRunner {
    pub fn new(
        annotator: Arc<dyn Annotator>,
        settings: PipelineSettings,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            annotator,
            settings,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            active: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Jobs currently holding a pipeline slot.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Start processing `job` in the background.
    pub fn spawn(self: &Arc<Self>, job: Arc<JobHandle>) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        let span = JobLogger::new(job.id(), "annotate").create_span();
        tokio::spawn(async move { runner.run(job).await }.instrument(span))
    }

    /// Process one job to a terminal status.
    pub async fn run(&self, job: Arc<JobHandle>) {
        let logger = JobLogger::new(job.id(), "annotate");
        let mut cancel_rx = job.cancel_receiver();

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit,
            _ = cancel_requested(&mut cancel_rx) => {
                logger.log_progress("cancelled while queued");
                self.finish_cancelled(&job).await;
                return;
            }
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                self.finish_failed(&job, &logger, &format!("scheduler closed: {}", e))
                    .await;
                return;
            }
        };

        if job.is_cancel_requested() {
            self.finish_cancelled(&job).await;
            return;
        }

        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_active_jobs(active);
        logger.log_start(&format!("input {}", job.input_path().display()));
        job.update(|s| s.start(0)).await;

        let (progress_tx, progress_rx) = progress::channel(progress::DEFAULT_CAPACITY);
        let consumer = tokio::spawn(
            consume_progress(Arc::clone(&job), progress_rx, logger.clone()).in_current_span(),
        );

        let request = AnnotateRequest::new(job.input_path(), job.output_path())
            .with_pipeline(self.settings.pipeline.clone())
            .with_encoder(self.settings.encoder.clone())
            .with_limits(self.settings.limits.clone());
        let annotator = Arc::clone(&self.annotator);
        let cancel = job.cancel_receiver();
        let handle = tokio::runtime::Handle::current();
        let span = tracing::Span::current();

        let result = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            handle.block_on(annotate_video(&request, annotator, progress_tx, cancel))
        })
        .await;

        // The sender is gone once the pipeline returns, so this drains and ends
        let _ = consumer.await;

        let active = self.active.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_active_jobs(active);

        match result {
            Ok(Ok(outcome)) => {
                let report = outcome.report;
                job.update(|s| s.complete(report.frames_written, report.detection_failures))
                    .await;
                metrics::record_job_finished("completed");
                logger.log_completion(&format!(
                    "{} frames, {} detections, {} reused after failure, {:.1}s",
                    report.frames_written,
                    report.detections_run,
                    report.detection_failures,
                    outcome.elapsed.as_secs_f64()
                ));
            }
            Ok(Err(MediaError::Cancelled)) => {
                logger.log_progress("cancelled during processing");
                self.finish_cancelled(&job).await;
            }
            Ok(Err(e)) => {
                if e.is_input_error() {
                    logger.log_warning(&e.to_string());
                }
                self.finish_failed(&job, &logger, &e.user_message()).await;
            }
            Err(e) => {
                self.finish_failed(&job, &logger, &format!("pipeline task panicked: {}", e))
                    .await;
            }
        }
    }

    async fn finish_cancelled(&self, job: &JobHandle) {
        job.update(|s| s.cancel()).await;
        job.release_workspace().await;
        metrics::record_job_finished("cancelled");
    }

    async fn finish_failed(&self, job: &JobHandle, logger: &JobLogger, message: &str) {
        logger.log_error(message);
        job.update(|s| s.fail(message)).await;
        job.release_workspace().await;
        metrics::record_job_finished("failed");
    }
}

/// Resolves once cancellation is requested.
async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender dropped: nobody can cancel any more
        std::future::pending::<()>().await;
    }
}

/// Fold pipeline progress into the job snapshot.
async fn consume_progress(job: Arc<JobHandle>, mut rx: ProgressReceiver, logger: JobLogger) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Started { total_frames } => {
                job.update(|s| s.start(total_frames)).await;
            }
            ProgressEvent::Frame {
                processed,
                total,
                fraction,
            } => {
                job.update(|s| s.record_frame(processed, total, fraction)).await;
            }
            ProgressEvent::DetectionFailed { frame_index, error } => {
                logger.log_warning(&format!(
                    "detection failed on frame {}: {}",
                    frame_index, error
                ));
            }
            // Final status is set from the pipeline result
            ProgressEvent::Complete { .. } | ProgressEvent::Failed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqua_media::{AnnotationResult, Frame, JobWorkspace};
    use aqua_models::{JobId, JobStatus};
    use tokio_test::{assert_pending, assert_ready, task};

    struct Passthrough;

    impl Annotator for Passthrough {
        fn annotate(&self, frame: &Frame) -> AnnotationResult {
            Ok(frame.clone())
        }

        fn name(&self) -> &'static str {
            "passthrough"
        }
    }

    #[test]
    fn test_cancel_signal_waits_for_request() {
        let (tx, mut rx) = watch::channel(false);
        let mut wait = task::spawn(cancel_requested(&mut rx));
        assert_pending!(wait.poll());

        tx.send_replace(true);
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_cancel_signal_pends_after_sender_drops() {
        let (tx, mut rx) = watch::channel(false);
        let mut wait = task::spawn(cancel_requested(&mut rx));
        drop(tx);
        assert_pending!(wait.poll());
    }

    fn runner(slots: usize) -> Arc<JobRunner> {
        Arc::new(JobRunner::new(
            Arc::new(Passthrough),
            PipelineSettings::default(),
            slots,
        ))
    }

    async fn job(root: &std::path::Path, bytes: &[u8]) -> Arc<JobHandle> {
        let workspace = JobWorkspace::create(root, "mp4").await.unwrap();
        workspace.write_input(bytes).await.unwrap();
        Arc::new(JobHandle::new(JobId::new(), None, workspace))
    }

    #[tokio::test]
    async fn test_empty_upload_fails_and_releases_files() {
        let root = tempfile::tempdir().unwrap();
        let job = job(root.path(), b"").await;
        let dir = job.input_path().parent().unwrap().to_path_buf();

        runner(1).run(Arc::clone(&job)).await;

        let snapshot = job.snapshot().await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.error_message.is_some());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_queued_job_can_be_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner(1);
        let job = job(root.path(), b"queued").await;

        // Occupy the only slot so the job has to wait
        let held = Arc::clone(&runner.permits).acquire_owned().await.unwrap();
        let task = runner.spawn(Arc::clone(&job));
        tokio::task::yield_now().await;
        assert_eq!(job.status().await, JobStatus::Queued);

        assert!(job.request_cancel().await);
        task.await.unwrap();
        drop(held);

        assert_eq!(job.status().await, JobStatus::Cancelled);
        assert!(job.completed_output().await.is_none());
        assert_eq!(runner.active_jobs(), 0);
    }
}
