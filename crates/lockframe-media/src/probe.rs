//! FFprobe video information.

use lockframe_models::VideoProps;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Display width in pixels, after applying `rotation`
    pub width: u32,
    /// Display height in pixels, after applying `rotation`
    pub height: u32,
    /// Display rotation in degrees, normalized to 0, 90, 180 or 270.
    ///
    /// FFmpeg autorotates while decoding, so frames arrive at the display
    /// size rather than the coded size.
    pub rotation: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Frame count (from the stream header, else estimated from duration)
    pub frame_count: u64,
    /// Video codec
    pub codec: String,
    /// Whether the file carries an audio stream
    pub has_audio: bool,
}

impl VideoInfo {
    /// Properties needed by the frame-sequential pipeline.
    pub fn props(&self) -> VideoProps {
        VideoProps::new(self.width, self.height, self.fps, self.frame_count)
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
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
    side_data_list: Vec<FfprobeSideData>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

impl FfprobeStream {
    /// Rotation from the display matrix side data, else the legacy `rotate` tag.
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| self.tags.rotate.as_ref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        normalize_rotation(degrees)
    }
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_ffprobe()?;

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
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
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Turn FFprobe's JSON into [`VideoInfo`].
fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

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

    let rotation = video_stream.rotation();
    let (width, height) = if rotation % 180 == 90 {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let duration = video_stream
        .duration
        .as_ref()
        .or(probe.format.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .and_then(|r| parse_frame_rate(r))
        .or_else(|| video_stream.r_frame_rate.as_ref().and_then(|r| parse_frame_rate(r)))
        .unwrap_or(30.0);

    let frame_count = video_stream
        .nb_frames
        .as_ref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration * fps).round().max(0.0) as u64);

    Ok(VideoInfo {
        duration,
        width,
        height,
        rotation,
        fps,
        frame_count,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

/// Snap to the nearest quarter turn in `0..360`.
fn normalize_rotation(degrees: f64) -> u32 {
    if !degrees.is_finite() {
        return 0;
    }
    let quarters = (degrees / 90.0).round().rem_euclid(4.0);
    quarters as u32 * 90
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (rate > 0.0).then_some(rate)
}
