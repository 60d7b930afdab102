//! Upload limits checked before any processing starts.
//!
//! Oversized or unsupported uploads fail fast with an input error instead of
//! consuming unbounded disk, memory or CPU time.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;

/// Container extensions accepted for upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "wmv", "mpeg", "mpg"];

/// Limits applied to uploaded videos.
#[derive(Debug, Clone)]
pub struct InputLimits {
    allowed_extensions: HashSet<String>,
    /// Maximum upload size in bytes
    pub max_file_size_bytes: u64,
    /// Maximum stream duration in seconds
    pub max_duration_secs: f64,
    /// Maximum frame width in pixels
    pub max_width: u32,
    /// Maximum frame height in pixels
    pub max_height: u32,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            allowed_extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_file_size_bytes: 500 * 1024 * 1024,
            max_duration_secs: 600.0,
            max_width: 3840,
            max_height: 2160,
        }
    }
}

/// Megabytes to bytes, saturating on absurd values.
fn megabytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

impl InputLimits {
    /// Load limits from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_file_size_bytes: std::env::var("MAX_UPLOAD_MB")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(megabytes)
                .unwrap_or(defaults.max_file_size_bytes),
            max_duration_secs: std::env::var("MAX_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_duration_secs),
            max_width: std::env::var("MAX_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_width),
            max_height: std::env::var("MAX_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_height),
            ..defaults
        }
    }

    /// Set maximum file size limit.
    pub fn with_max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = bytes;
        self
    }

    /// Set maximum duration limit.
    pub fn with_max_duration_secs(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Set maximum resolution limit.
    pub fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_width = width;
        self.max_height = height;
        self
    }

    /// Validate an upload filename: no path components, supported extension.
    pub fn validate_filename(&self, name: &str) -> MediaResult<()> {
        if name.contains('\0') || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(MediaError::UnsupportedFormat(format!(
                "invalid file name: {}",
                name
            )));
        }
        self.validate_extension(Path::new(name))
    }

    /// Validate that a path has a supported container extension.
    pub fn validate_extension(&self, path: &Path) -> MediaResult<()> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .ok_or_else(|| MediaError::UnsupportedFormat("file has no extension".to_string()))?;

        if self.allowed_extensions.contains(&ext) {
            Ok(())
        } else {
            Err(MediaError::UnsupportedFormat(format!(
                "'.{}' is not supported (expected one of: {})",
                ext,
                SUPPORTED_EXTENSIONS.join(", ")
            )))
        }
    }

    /// Validate file size is within limits. Empty files are never valid video.
    pub fn validate_file_size(&self, size_bytes: u64) -> MediaResult<()> {
        if size_bytes == 0 {
            return Err(MediaError::InvalidVideo("file is empty".to_string()));
        }
        if size_bytes > self.max_file_size_bytes {
            return Err(MediaError::ResourceLimit(format!(
                "file size {}MB exceeds maximum {}MB",
                size_bytes / (1024 * 1024),
                self.max_file_size_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }

    /// Validate an uploaded file on disk.
    pub async fn validate_file(&self, path: &Path) -> MediaResult<()> {
        self.validate_extension(path)?;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;
        self.validate_file_size(metadata.len())
    }

    /// Validate probed stream metadata.
    pub fn validate_stream(&self, info: &VideoInfo) -> MediaResult<()> {
        if info.duration > self.max_duration_secs {
            return Err(MediaError::ResourceLimit(format!(
                "duration {:.1}s exceeds maximum {:.0}s",
                info.duration, self.max_duration_secs
            )));
        }
        if info.width > self.max_width || info.height > self.max_height {
            return Err(MediaError::ResourceLimit(format!(
                "resolution {}x{} exceeds maximum {}x{}",
                info.width, info.height, self.max_width, self.max_height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration: f64, width: u32, height: u32) -> VideoInfo {
        VideoInfo {
            duration,
            width,
            height,
            rotation: 0,
            fps: 30.0,
            frame_count: (duration * 30.0) as u64,
            codec: "h264".into(),
            size: 1,
            bitrate: 0,
        }
    }

    #[test]
    fn test_supported_extensions() {
        let limits = InputLimits::default();
        for name in ["tank.mp4", "TANK.MOV", "a.avi", "b.mkv", "c.webm", "d.wmv", "e.mpeg"] {
            assert!(limits.validate_filename(name).is_ok(), "{} should be accepted", name);
        }
        assert!(limits.validate_filename("notes.txt").is_err());
        assert!(limits.validate_filename("noext").is_err());
    }

    #[test]
    fn test_megabytes_saturates() {
        assert_eq!(megabytes(500), 500 * 1024 * 1024);
        assert_eq!(megabytes(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_rejects_path_components() {
        let limits = InputLimits::default();
        assert!(limits.validate_filename("../tank.mp4").is_err());
        assert!(limits.validate_filename("dir/tank.mp4").is_err());
    }

    #[test]
    fn test_file_size_limits() {
        let limits = InputLimits::default().with_max_file_size_bytes(1024);
        assert!(matches!(
            limits.validate_file_size(0),
            Err(MediaError::InvalidVideo(_))
        ));
        assert!(limits.validate_file_size(1024).is_ok());
        assert!(matches!(
            limits.validate_file_size(1025),
            Err(MediaError::ResourceLimit(_))
        ));
    }

    #[test]
    fn test_stream_limits() {
        let limits = InputLimits::default()
            .with_max_duration_secs(60.0)
            .with_max_resolution(1920, 1080);

        assert!(limits.validate_stream(&info(30.0, 1280, 720)).is_ok());
        assert!(limits.validate_stream(&info(61.0, 1280, 720)).is_err());
        assert!(limits.validate_stream(&info(30.0, 3840, 720)).is_err());
    }

    #[tokio::test]
    async fn test_validate_empty_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        tokio::fs::write(&path, b"").await.unwrap();

        let err = tokio_test::assert_err!(InputLimits::default().validate_file(&path).await);
        assert!(err.is_input_error());
    }
}
