//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Video stream information, read once when the stream is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Displayed width in pixels, after rotation metadata is applied
    pub width: u32,
    /// Displayed height in pixels, after rotation metadata is applied
    pub height: u32,
    /// Clockwise display rotation in degrees (0, 90, 180 or 270)
    #[serde(default)]
    pub rotation: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Total number of frames (from the container, or estimated)
    pub frame_count: u64,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: Option<FfprobeStreamTags>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStreamTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display rotation, normalized to a clockwise quarter turn.
    ///
    /// The display matrix side data wins over the legacy `rotate` tag.
    /// FFmpeg reports the matrix angle counter-clockwise.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|sd| sd.rotation)
            .map(|r| -r)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);

        let quarter_turns = (degrees / 90.0).round() as i64;
        (quarter_turns.rem_euclid(4) * 90) as u32
    }
}

/// Probe a video file for information.
///
/// Fails with [`MediaError::InvalidVideo`] when FFprobe cannot read the file
/// or it contains no usable video stream.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    // Check FFprobe exists
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(MediaError::InvalidVideo(if stderr.is_empty() {
            "FFprobe could not read the file".to_string()
        } else {
            stderr
        }));
    }

    parse_probe_output(&output.stdout)
}

/// Turn FFprobe JSON into [`VideoInfo`].
fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    // Find video stream
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let coded_width = video_stream.width.unwrap_or(0);
    let coded_height = video_stream.height.unwrap_or(0);
    if coded_width == 0 || coded_height == 0 {
        return Err(MediaError::InvalidVideo(
            "Video stream has no dimensions".to_string(),
        ));
    }

    // The decoder applies rotation, so quarter turns swap the frame geometry
    let rotation = video_stream.rotation();
    let (width, height) = if rotation % 180 == 90 {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let format = probe.format.as_ref();

    // Parse duration (container first, then stream)
    let duration = format
        .and_then(|f| f.duration.as_ref())
        .or(video_stream.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    // Parse size
    let size = format
        .and_then(|f| f.size.as_ref())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    // Parse bitrate
    let bitrate = format
        .and_then(|f| f.bit_rate.as_ref())
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    // Parse frame rate
    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    // Frame count: container value when present, else estimated
    let frame_count = video_stream
        .nb_frames
        .as_ref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Ok(VideoInfo {
        duration,
        width,
        height,
        rotation,
        fps,
        frame_count,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
        bitrate,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse::<f64>().ok().filter(|fps| *fps > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output_uses_nb_frames() {
        let json = br#"{
            "format": {"duration": "1.000000", "size": "2048", "bit_rate": "16384"},
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 10, "height": 10,
                 "avg_frame_rate": "30/1", "r_frame_rate": "30/1", "nb_frames": "30"}
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 10);
        assert_eq!(info.height, 10);
        assert_eq!(info.frame_count, 30);
        assert_eq!(info.codec, "h264");
        assert_eq!(info.size, 2048);
    }

    #[test]
    fn test_parse_probe_output_swaps_rotated_dimensions() {
        // Portrait phone clip: coded landscape, display matrix turns it upright
        let json = br#"{
            "format": {"duration": "1.0"},
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080, "avg_frame_rate": "30/1",
                 "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));
        assert_eq!(info.rotation, 90);
    }

    #[test]
    fn test_parse_probe_output_reads_legacy_rotate_tag() {
        let json = br#"{
            "format": {"duration": "1.0"},
            "streams": [
                {"codec_type": "video", "width": 640, "height": 480, "avg_frame_rate": "30/1",
                 "tags": {"rotate": "270"}}
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (480, 640));
        assert_eq!(info.rotation, 270);
    }

    #[test]
    fn test_parse_probe_output_keeps_geometry_for_half_turn() {
        let json = br#"{
            "format": {"duration": "1.0"},
            "streams": [
                {"codec_type": "video", "width": 640, "height": 480, "avg_frame_rate": "30/1",
                 "side_data_list": [{"side_data_type": "Display Matrix", "rotation": 180}]}
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (640, 480));
        assert_eq!(info.rotation, 180);
    }

    #[test]
    fn test_parse_probe_output_estimates_frame_count() {
        let json = br#"{
            "format": {"duration": "2.0"},
            "streams": [
                {"codec_type": "video", "width": 640, "height": 360, "avg_frame_rate": "25/1"}
            ]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, 50);
    }

    #[test]
    fn test_parse_probe_output_requires_video_stream() {
        let json = br#"{"format": {}, "streams": [{"codec_type": "audio"}]}"#;
        let err = parse_probe_output(json).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_parse_probe_output_handles_empty_probe() {
        let err = parse_probe_output(b"{}").unwrap_err();
        assert!(matches!(err, MediaError::InvalidVideo(_)));
    }
}
