//! Raw frame decoding through an FFmpeg pipe.
//!
//! FFmpeg decodes the upload and writes packed RGB24 frames to stdout; the
//! reader slices that byte stream into [`Frame`]s. The stream is single-pass:
//! once a frame has been returned it cannot be read again.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{collect_stderr, FfmpegCommand, PIPE_STDOUT};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::probe::{probe_video, VideoInfo};

/// Ordered, finite, single-pass sequence of frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Decoder backed by an FFmpeg child process.
pub struct FrameReader {
    path: PathBuf,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Option<String>>>,
    width: u32,
    height: u32,
    next_index: u64,
    finished: bool,
}

impl FrameReader {
    /// Probe `path` and start decoding it.
    ///
    /// Unreadable or unsupported files fail here, before any frame is produced.
    pub async fn open(path: impl AsRef<Path>) -> MediaResult<(VideoInfo, Self)> {
        let path = path.as_ref();
        let info = probe_video(path).await?;
        let reader = Self::spawn(path, &info)?;
        Ok((info, reader))
    }

    /// Start decoding a stream whose metadata is already known.
    pub fn spawn(path: impl AsRef<Path>, info: &VideoInfo) -> MediaResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut child = FfmpegCommand::from_file(&path, PIPE_STDOUT)
            .raw_rgb_output()
            .spawn(Stdio::null(), Stdio::piped())?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("decoder stdout not captured"))?;
        let stderr = child.stderr.take().map(collect_stderr);

        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            rotation = info.rotation,
            "Decoder started"
        );

        Ok(Self {
            path,
            child,
            stdout: BufReader::with_capacity(Frame::byte_len(info.width, info.height), stdout),
            stderr,
            width: info.width,
            height: info.height,
            next_index: 0,
            finished: false,
        })
    }

    /// Number of frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.next_index
    }

    /// Wait for the decoder to exit and report a non-zero exit as an error.
    pub async fn finish(mut self) -> MediaResult<()> {
        let status = self.child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            let stderr = self.take_stderr().await;
            Err(MediaError::decode_failed(
                format!("FFmpeg decoder exited with status {:?}", status.code()),
                stderr,
            ))
        }
    }

    /// Stop decoding early.
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(path = %self.path.display(), "Decoder already exited: {}", e);
        }
    }

    async fn take_stderr(&mut self) -> Option<String> {
        match self.stderr.take() {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        }
    }
}

#[async_trait]
impl FrameSource for FrameReader {
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let frame_len = Frame::byte_len(self.width, self.height);
        let mut data = vec![0u8; frame_len];
        let filled = read_full(&mut self.stdout, &mut data).await?;

        if filled == 0 {
            self.finished = true;
            let status = self.child.wait().await?;
            if !status.success() {
                let stderr = self.take_stderr().await;
                return Err(MediaError::decode_failed(
                    format!(
                        "FFmpeg decoder exited with status {:?} after {} frames",
                        status.code(),
                        self.next_index
                    ),
                    stderr,
                ));
            }
            debug!(frames = self.next_index, "Decoder reached end of stream");
            return Ok(None);
        }

        if filled < frame_len {
            self.finished = true;
            warn!(
                path = %self.path.display(),
                expected = frame_len,
                got = filled,
                "Decoder produced a truncated frame"
            );
            let stderr = self.take_stderr().await;
            return Err(MediaError::decode_failed(
                format!(
                    "truncated frame {}: expected {} bytes, got {}",
                    self.next_index, frame_len, filled
                ),
                stderr,
            ));
        }

        let frame = Frame::new(self.next_index, self.width, self.height, data)?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Read until `buf` is full or the reader hits end of file.
///
/// Returns the number of bytes read; anything less than `buf.len()` means EOF.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
