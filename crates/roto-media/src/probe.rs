//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Shape of a video as it flows through the pipeline.
///
/// Probed once per job; when a resize factor applies, the scaled copy
/// from [`VideoDescriptor::scaled`] is what every later stage sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoDescriptor {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Total number of frames
    pub frame_count: u64,
    /// Duration in seconds
    pub duration: f64,
    /// Video codec
    pub codec: String,
}

impl VideoDescriptor {
    /// Bytes of one decoded RGB frame.
    pub fn frame_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * 3
    }

    /// Apply a uniform resize factor, rounding each dimension to the
    /// nearest pixel (minimum 1).
    pub fn scaled(&self, factor: f32) -> Self {
        if (factor - 1.0).abs() < f32::EPSILON {
            return self.clone();
        }
        let width = ((self.width as f32 * factor).round() as u32).max(1);
        let height = ((self.height as f32 * factor).round() as u32).max(1);
        Self {
            width,
            height,
            ..self.clone()
        }
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
}

/// Probe a video file for its descriptor.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoDescriptor> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    // Check FFprobe exists
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
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

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    // Find video stream
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_video("Video stream has no dimensions"));
    }

    // Parse duration
    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    // Parse frame rate
    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .or(video_stream.r_frame_rate.as_ref())
        .and_then(|r| parse_frame_rate(r))
        .unwrap_or(30.0);

    // nb_frames is absent from some containers; fall back to duration
    let frame_count = video_stream
        .nb_frames
        .as_ref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Ok(VideoDescriptor {
        width,
        height,
        fps,
        frame_count,
        duration,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(width: u32, height: u32) -> VideoDescriptor {
        VideoDescriptor {
            width,
            height,
            fps: 30.0,
            frame_count: 300,
            duration: 10.0,
            codec: "h264".to_string(),
        }
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_scaled_rounds_to_nearest() {
        let d = descriptor(1919, 1079);
        let half = d.scaled(0.5);
        assert_eq!(half.width, 960); // 959.5 rounds up
        assert_eq!(half.height, 540); // 539.5 rounds up
        assert_eq!(half.frame_count, d.frame_count);
    }

    #[test]
    fn test_scaled_identity() {
        let d = descriptor(1280, 720);
        let same = d.scaled(1.0);
        assert_eq!(same.width, 1280);
        assert_eq!(same.height, 720);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(descriptor(640, 360).frame_bytes(), 640 * 360 * 3);
    }
}
