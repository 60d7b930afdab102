//! Background eviction of finished jobs.
//!
//! Completed, failed and cancelled jobs are kept for a while so the browser
//! can fetch the result, then dropped along with their files.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::info;

use aqua_models::JobId;

use crate::metrics;
use crate::services::job_registry::JobRegistry;

/// Longest pause between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically evicts expired jobs.
pub struct JobReaper {
    registry: Arc<JobRegistry>,
    ttl: Duration,
}

impl JobReaper {
    pub fn new(registry: Arc<JobRegistry>, ttl: Duration) -> Self {
        Self { registry, ttl }
    }

    fn sweep_interval(&self) -> Duration {
        (self.ttl / 4).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL)
    }

    /// Run the eviction loop forever. Spawn this as a background task.
    pub async fn run(&self) {
        let every = self.sweep_interval();
        info!("Starting job reaper (ttl: {:?}, interval: {:?})", self.ttl, every);

        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// Run a single eviction pass.
    pub async fn sweep_once(&self) -> Vec<JobId> {
        let evicted = self.registry.evict_expired(self.ttl).await;
        if !evicted.is_empty() {
            metrics::record_jobs_evicted(evicted.len());
            info!(count = evicted.len(), "Evicted expired jobs");
        }
        evicted
    }
}
