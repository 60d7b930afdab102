//! Raw frame encoding through an FFmpeg pipe.
//!
//! Frames are written as packed RGB24 to FFmpeg's stdin and encoded into a
//! browser-playable MP4 with the source frame rate and resolution.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{check_encoder, collect_stderr, FfmpegCommand, PIPE_STDIN};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::probe::VideoInfo;

/// Consumer of the emitted frame sequence.
#[async_trait]
pub trait FrameSink: Send {
    /// Append one frame to the output.
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()>;
}

/// Output encoding settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    /// FFmpeg video encoder name
    pub codec: String,
    /// Encoder preset
    pub preset: String,
    /// Constant rate factor
    pub crf: u8,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
        }
    }
}

impl EncoderSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            codec: std::env::var("VIDEO_CODEC").unwrap_or(defaults.codec),
            preset: std::env::var("VIDEO_PRESET").unwrap_or(defaults.preset),
            crf: std::env::var("VIDEO_CRF")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.crf),
        }
    }

    /// Build the FFmpeg command that encodes RGB24 frames from stdin.
    pub fn build_command(&self, output: &Path, info: &VideoInfo) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(PIPE_STDIN, output.to_string_lossy().to_string())
            .raw_rgb_input(info.width, info.height, info.fps)
            .video_codec(self.codec.clone());

        // yuv420p needs even dimensions
        if info.width % 2 != 0 || info.height % 2 != 0 {
            cmd = cmd.video_filter("pad=ceil(iw/2)*2:ceil(ih/2)*2");
        }

        cmd.preset(self.preset.clone())
            .crf(self.crf)
            .pixel_format("yuv420p")
            .output_args(["-an"])
            .faststart()
    }
}

/// Encoder backed by an FFmpeg child process.
pub struct FrameWriter {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<Option<String>>>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl FrameWriter {
    /// Open an encoder writing to `path`.
    ///
    /// Fails at open time when FFmpeg or the configured encoder is missing.
    pub async fn open(
        path: impl AsRef<Path>,
        info: &VideoInfo,
        settings: &EncoderSettings,
    ) -> MediaResult<Self> {
        let path = path.as_ref().to_path_buf();

        check_encoder(&settings.codec).await?;

        if info.width % 2 != 0 || info.height % 2 != 0 {
            warn!(
                width = info.width,
                height = info.height,
                "Odd frame dimensions, output will be padded to even size"
            );
        }

        let mut child = settings
            .build_command(&path, info)
            .spawn(Stdio::piped(), Stdio::null())?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("encoder stdin not captured"))?;
        let stderr = child.stderr.take().map(collect_stderr);

        debug!(
            path = %path.display(),
            codec = %settings.codec,
            fps = info.fps,
            "Encoder started"
        );

        Ok(Self {
            path,
            child,
            stdin: Some(stdin),
            stderr,
            width: info.width,
            height: info.height,
            frames_written: 0,
        })
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close stdin and wait for the encoder to flush the file.
    pub async fn finish(mut self) -> MediaResult<PathBuf> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await.ok();
        }

        let status = self.child.wait().await?;
        if !status.success() {
            let stderr = self.take_stderr().await;
            remove_partial(&self.path).await;
            return Err(MediaError::encode_failed(
                "FFmpeg encoder exited with non-zero status",
                stderr,
                status.code(),
            ));
        }

        info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Encoder finished"
        );
        Ok(self.path)
    }

    /// Kill the encoder and delete whatever it wrote.
    pub async fn abort(mut self) {
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            debug!("Encoder already exited: {}", e);
        }
        remove_partial(&self.path).await;
    }

    async fn take_stderr(&mut self) -> Option<String> {
        match self.stderr.take() {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        }
    }
}

#[async_trait]
impl FrameSink for FrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> MediaResult<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(MediaError::internal(format!(
                "frame {} is {}x{}, encoder expects {}x{}",
                frame.index, frame.width, frame.height, self.width, self.height
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::encode_failed("encoder input already closed", None, None))?;

        if let Err(e) = stdin.write_all(&frame.data).await {
            self.stdin.take();
            let status = self.child.wait().await.ok();
            let stderr = self.take_stderr().await;
            return Err(MediaError::encode_failed(
                format!("failed to write frame {}: {}", self.frames_written, e),
                stderr,
                status.and_then(|s| s.code()),
            ));
        }

        self.frames_written += 1;
        Ok(())
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove partial output: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32) -> VideoInfo {
        VideoInfo {
            duration: 1.0,
            width,
            height,
            rotation: 0,
            fps: 30.0,
            frame_count: 30,
            codec: "h264".into(),
            size: 0,
            bitrate: 0,
        }
    }

    #[test]
    fn test_encoder_command_keeps_geometry_and_rate() {
        let args = EncoderSettings::default()
            .build_command(Path::new("/tmp/out.mp4"), &info(10, 10))
            .build_args();

        assert!(args.contains(&"10x10".to_string()));
        assert!(args.contains(&"30".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_encoder_command_pads_odd_dimensions() {
        let args = EncoderSettings::default()
            .build_command(Path::new("out.mp4"), &info(11, 9))
            .build_args();

        assert!(args.contains(&"-vf".to_string()));
    }

    #[tokio::test]
    async fn test_remove_partial_ignores_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mp4");
        remove_partial(&path).await;

        let existing = dir.path().join("partial.mp4");
        tokio::fs::write(&existing, b"junk").await.unwrap();
        remove_partial(&existing).await;
        assert!(!existing.exists());
    }
}
