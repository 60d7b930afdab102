//! Per-job scratch directories.
//!
//! Each job gets its own temporary directory holding the upload and the
//! annotated output. The directory and everything in it is removed when the
//! workspace is dropped.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// File name of the annotated output inside a workspace.
pub const OUTPUT_FILE_NAME: &str = "detected.mp4";

/// Temporary directory owned by a single job.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
    input: PathBuf,
}

impl JobWorkspace {
    /// Create a workspace under `root`, creating `root` if needed.
    ///
    /// `extension` is the upload's container extension; the stored input keeps
    /// it so the decoder can use it as a format hint.
    pub async fn create(root: impl AsRef<Path>, extension: &str) -> MediaResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await?;

        let dir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(root)
            .map_err(|e| {
                MediaError::internal(format!(
                    "failed to create job directory in {}: {}",
                    root.display(),
                    e
                ))
            })?;

        let extension = extension.trim_start_matches('.').to_lowercase();
        let input = dir.path().join(format!("input.{}", extension));

        debug!(dir = %dir.path().display(), "Created job workspace");
        Ok(Self { dir, input })
    }

    /// Workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the upload is stored.
    pub fn input_path(&self) -> &Path {
        &self.input
    }

    /// Where the annotated video is written.
    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join(OUTPUT_FILE_NAME)
    }

    /// Whether a finished output file exists.
    pub fn has_output(&self) -> bool {
        self.output_path().is_file()
    }

    /// Store upload bytes as the job input.
    pub async fn write_input(&self, bytes: &[u8]) -> MediaResult<()> {
        fs::write(&self.input, bytes).await?;
        Ok(())
    }
}

/// Check that `dir` exists (creating it) and accepts new files.
pub async fn check_writable(dir: impl AsRef<Path>) -> MediaResult<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).await?;
    let probe = dir.join(format!(".write-check-{}", uuid::Uuid::new_v4()));
    fs::write(&probe, b"ok").await?;
    fs::remove_file(&probe).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_layout() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path(), ".MP4").await.unwrap();

        assert!(ws.path().starts_with(root.path()));
        assert_eq!(ws.input_path().file_name().unwrap(), "input.mp4");
        assert_eq!(ws.output_path().file_name().unwrap(), OUTPUT_FILE_NAME);
        assert!(!ws.has_output());
    }

    #[tokio::test]
    async fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(root.path(), "mov").await.unwrap();
        ws.write_input(b"bytes").await.unwrap();
        let dir = ws.path().to_path_buf();
        assert!(ws.input_path().exists());

        drop(ws);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_check_writable_creates_dir() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        check_writable(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 0);
    }
}
