//! Application state.

use std::sync::Arc;

use tracing::info;

use aqua_media::{Annotator, YoloAnnotator};

use crate::config::{ApiConfig, PipelineSettings};
use crate::services::{JobRegistry, JobRunner};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: Arc<JobRegistry>,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Load pipeline settings from the environment and the detection model.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let settings = PipelineSettings::from_env()?;
        let detector = settings.detector.clone();
        info!(model = %detector.model_path.display(), "Loading detection model");

        // Session creation reads and optimizes the model file
        let annotator = tokio::task::spawn_blocking(move || YoloAnnotator::new(detector)).await??;

        Ok(Self::with_annotator(config, settings, Arc::new(annotator)))
    }

    /// Build state around an already constructed annotator.
    pub fn with_annotator(
        config: ApiConfig,
        settings: PipelineSettings,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        let runner = JobRunner::new(annotator, settings, config.max_concurrent_jobs);
        Self {
            config,
            jobs: Arc::new(JobRegistry::new()),
            runner: Arc::new(runner),
        }
    }
}
