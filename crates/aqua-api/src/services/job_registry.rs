//! In-memory registry of annotation jobs.
//!
//! Jobs live only as long as the process. Each entry owns the job's scratch
//! workspace; releasing the workspace deletes the upload and the output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::debug;

use aqua_media::JobWorkspace;
use aqua_models::{JobId, JobSnapshot, JobStatus};

/// One submitted video and its processing state.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    snapshot: RwLock<JobSnapshot>,
    cancel_tx: watch::Sender<bool>,
    workspace: Mutex<Option<JobWorkspace>>,
    input_path: PathBuf,
    output_path: PathBuf,
}

impl JobHandle {
    /// Wrap an uploaded video that is waiting to be processed.
    pub fn new(id: JobId, source_name: Option<String>, workspace: JobWorkspace) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            snapshot: RwLock::new(JobSnapshot::new(id.clone(), source_name)),
            input_path: workspace.input_path().to_path_buf(),
            output_path: workspace.output_path(),
            workspace: Mutex::new(Some(workspace)),
            cancel_tx,
            id,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> JobSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.snapshot.read().await.status
    }

    /// Apply a change to the snapshot.
    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut JobSnapshot),
    {
        let mut snapshot = self.snapshot.write().await;
        f(&mut snapshot);
    }

    /// Ask the job to stop. Returns false if it already finished.
    pub async fn request_cancel(&self) -> bool {
        if self.snapshot.read().await.is_terminal() {
            return false;
        }
        self.cancel_tx.send_replace(true);
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Receiver that flips to `true` when cancellation is requested.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Path of the annotated video, if the job completed and the file exists.
    pub async fn completed_output(&self) -> Option<PathBuf> {
        if self.status().await != JobStatus::Completed {
            return None;
        }
        let workspace = self.workspace.lock().await;
        workspace
            .as_ref()
            .filter(|ws| ws.has_output())
            .map(|ws| ws.output_path())
    }

    /// Delete the job's files. Safe to call more than once.
    pub async fn release_workspace(&self) {
        let workspace = self.workspace.lock().await.take();
        if let Some(workspace) = workspace {
            debug!(job_id = %self.id, dir = %workspace.path().display(), "Releasing job workspace");
            // TempDir removal is blocking filesystem work
            let _ = tokio::task::spawn_blocking(move || drop(workspace)).await;
        }
    }
}

/// All jobs known to this process.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Arc<JobHandle>) {
        self.jobs.write().await.insert(job.id().clone(), job);
    }

    pub async fn get(&self, id: &JobId) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &JobId) -> Option<Arc<JobHandle>> {
        self.jobs.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Remove finished jobs not updated within `ttl` and delete their files.
    ///
    /// Jobs that are queued or processing are never evicted.
    pub async fn evict_expired(&self, ttl: Duration) -> Vec<JobId> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now() - ttl;

        let mut expired = Vec::new();
        for job in self.jobs.read().await.values() {
            let snapshot = job.snapshot.read().await;
            if snapshot.is_terminal() && snapshot.updated_at <= cutoff {
                expired.push(job.id().clone());
            }
        }

        let mut evicted = Vec::with_capacity(expired.len());
        for id in expired {
            let removed = self.jobs.write().await.remove(&id);
            if let Some(job) = removed {
                job.release_workspace().await;
                evicted.push(id);
            }
        }
        evicted
    }
}
