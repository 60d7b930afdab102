//! FFmpeg command builder and process helpers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// FFmpeg target for reading from the child's stdin.
pub const PIPE_STDIN: &str = "pipe:0";
/// FFmpeg target for writing to the child's stdout.
pub const PIPE_STDOUT: &str = "pipe:1";

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path or pipe
    input: String,
    /// Output file path or pipe
    output: String,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Command reading from a file.
    pub fn from_file(input: impl Into<PathBuf>, output: impl Into<String>) -> Self {
        Self::new(input.into().to_string_lossy().to_string(), output)
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declare the input as packed RGB24 raw video of the given geometry.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format_fps(fps),
        ])
    }

    /// Emit packed RGB24 raw video, one output frame per decoded frame.
    ///
    /// FFmpeg applies display rotation while decoding, so frames come out in
    /// the displayed geometry that [`crate::probe::VideoInfo`] reports.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args([
            "-map", "0:v:0", "-an", "-sn", "-vsync", "passthrough", "-f", "rawvideo",
            "-pix_fmt", "rgb24",
        ])
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Move the MP4 index to the front so browsers can start playback early.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.clone());

        args.extend(self.output_args.clone());

        args.push(self.output.clone());

        args
    }

    /// Spawn FFmpeg with the given stdin/stdout wiring and a piped stderr.
    ///
    /// The child is killed if its handle is dropped.
    pub fn spawn(&self, stdin: Stdio, stdout: Stdio) -> MediaResult<Child> {
        check_ffmpeg()?;

        let args = self.build_args();
        debug!("Spawning FFmpeg: ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        Ok(child)
    }
}

/// Format a frame rate for the `-r` flag.
fn format_fps(fps: f64) -> String {
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-6 {
        format!("{}", rounded as u64)
    } else {
        format!("{:.6}", fps)
    }
}

/// Collect the last lines a child writes to stderr.
///
/// The returned handle resolves once the pipe closes; `None` means the child
/// wrote nothing.
pub fn collect_stderr(stderr: ChildStderr) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Ok(Some(line)) = reader.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        if tail.is_empty() {
            None
        } else {
            Some(Vec::from(tail).join("\n"))
        }
    })
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check that FFmpeg was built with the given video encoder.
pub async fn check_encoder(codec: &str) -> MediaResult<()> {
    check_ffmpeg()?;

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::EncoderUnavailable(format!(
            "could not list FFmpeg encoders (exit code {:?})",
            output.status.code()
        )));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    if encoder_listed(&listing, codec) {
        Ok(())
    } else {
        Err(MediaError::EncoderUnavailable(format!(
            "FFmpeg on this host has no '{}' video encoder",
            codec
        )))
    }
}

/// Whether `ffmpeg -encoders` output lists `codec` as a video encoder.
fn encoder_listed(listing: &str, codec: &str) -> bool {
    listing.lines().any(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(flags), Some(name)) => flags.starts_with('V') && name == codec,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .video_codec("libx264")
            .crf(18);

        let args = cmd.build_args();
        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("output.mp4"));
    }

    #[test]
    fn test_raw_input_args_precede_input() {
        let args = FfmpegCommand::new(PIPE_STDIN, "out.mp4")
            .raw_rgb_input(10, 10, 30.0)
            .build_args();

        let size_pos = args.iter().position(|a| a == "10x10").unwrap();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(size_pos < input_pos);
        assert!(args.contains(&"30".to_string()));
    }

    #[test]
    fn test_raw_output_is_rgb24() {
        let args = FfmpegCommand::from_file("in.mov", PIPE_STDOUT)
            .raw_rgb_output()
            .build_args();

        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let fmt_pos = args.iter().position(|a| a == "rawvideo").unwrap();
        assert!(fmt_pos > input_pos);
        assert!(args.contains(&"rgb24".to_string()));
        assert!(args.contains(&"passthrough".to_string()));
    }

    #[test]
    fn test_format_fps() {
        assert_eq!(format_fps(30.0), "30");
        assert_eq!(format_fps(29.97002997), "29.970030");
    }

    #[test]
    fn test_encoder_listing() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D libx264              libx264 H.264\n A....D aac                  AAC\n";
        assert!(encoder_listed(listing, "libx264"));
        assert!(!encoder_listed(listing, "aac"));
        assert!(!encoder_listed(listing, "libx265"));
    }
}
