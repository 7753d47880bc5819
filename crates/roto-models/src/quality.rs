//! Output encoding quality tiers.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default pixel format; players universally accept 4:2:0
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Output quality tier, mapped to x264 CRF/preset pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputQuality {
    /// Fast turnaround, visibly compressed
    Low,
    /// Balanced default
    #[default]
    Medium,
    /// Near-transparent, slow encode
    High,
}

impl OutputQuality {
    /// Constant rate factor for this tier.
    pub fn crf(&self) -> u8 {
        match self {
            OutputQuality::Low => 28,
            OutputQuality::Medium => 23,
            OutputQuality::High => 18,
        }
    }

    /// x264 speed preset for this tier.
    pub fn preset(&self) -> &'static str {
        match self {
            OutputQuality::Low => "faster",
            OutputQuality::Medium => "medium",
            OutputQuality::High => "slow",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputQuality::Low => "low",
            OutputQuality::Medium => "medium",
            OutputQuality::High => "high",
        }
    }

    /// Convert to FFmpeg output arguments (codec, preset, crf, pix_fmt).
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            DEFAULT_VIDEO_CODEC.to_string(),
            "-preset".to_string(),
            self.preset().to_string(),
            "-crf".to_string(),
            self.crf().to_string(),
            "-pix_fmt".to_string(),
            DEFAULT_PIXEL_FORMAT.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_mapping() {
        assert_eq!(OutputQuality::Low.crf(), 28);
        assert_eq!(OutputQuality::Medium.crf(), 23);
        assert_eq!(OutputQuality::High.crf(), 18);
        assert_eq!(OutputQuality::High.preset(), "slow");
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = OutputQuality::default().to_ffmpeg_args();
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"23".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
    }

    #[test]
    fn test_serde_names() {
        let q: OutputQuality = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(q, OutputQuality::High);
    }
}
