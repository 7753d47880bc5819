//! Effect parameters.
//!
//! One canonical parameter set with documented defaults replaces the
//! historical per-deployment variants. Named presets cover the common
//! looks; everything else is an explicit override.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default blend weight between current and previous frame data.
pub const DEFAULT_TEMPORAL_SMOOTHING: f32 = 0.3;
/// Default weight given to the flow-warped previous mask.
pub const DEFAULT_FLOW_WEIGHT: f32 = 0.5;
/// Default number of frames processed per batch.
pub const DEFAULT_BATCH_SIZE: u32 = 30;

/// Color quantization algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorMethod {
    /// K-means clustering in CIELAB space (deterministic seeded init)
    #[default]
    Kmeans,
    /// Edge-preserving bilateral smoothing followed by coarse levels
    Bilateral,
    /// Uniform per-channel posterization
    Posterize,
}

impl ColorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMethod::Kmeans => "kmeans",
            ColorMethod::Bilateral => "bilateral",
            ColorMethod::Posterize => "posterize",
        }
    }
}

/// Parameters for the rotoscoping effect.
///
/// All fields are optional on the wire; absent fields take the defaults
/// below. Ranges are enforced before a job is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EffectParams {
    /// Edge emphasis: higher values darken and thicken detected lines (0-1)
    #[serde(default = "default_edge_strength")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub edge_strength: f32,

    /// Line thickness multiplier; >1 dilates, <1 erodes
    #[serde(default = "default_edge_thickness")]
    #[validate(range(min = 0.5, max = 3.0))]
    pub edge_thickness: f32,

    /// Binarization threshold for the edge confidence map.
    /// When absent, derived from `edge_strength`.
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: Option<f32>,

    /// Number of quantized colors
    #[serde(default = "default_num_colors")]
    #[validate(range(min = 2, max = 16))]
    pub num_colors: u32,

    /// Quantization algorithm
    #[serde(default)]
    pub color_method: ColorMethod,

    /// Pre-quantization smoothing amount (0-1)
    #[serde(default = "default_smoothing")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub smoothing: f32,

    /// Chroma multiplier applied after quantization
    #[serde(default = "default_saturation")]
    #[validate(range(min = 0.0, max = 3.0))]
    pub saturation: f32,

    /// Blend weight of previous-frame data (0 disables temporal blending).
    /// Capped below 1.0: a full-weight blend would freeze the output on
    /// the first frame forever.
    #[serde(default = "default_temporal_smoothing")]
    #[validate(range(min = 0.0, max = 0.9))]
    pub temporal_smoothing: f32,

    /// Weight of the flow-warped previous edge mask (0-1)
    #[serde(default = "default_flow_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub flow_weight: f32,

    /// Render edge pixels as solid black
    #[serde(default = "default_preserve_black")]
    pub preserve_black: bool,

    /// Frames held in memory per batch
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 300))]
    pub batch_size: u32,

    /// Uniform spatial downscale applied before processing (0-1]
    #[serde(default = "default_resize_factor")]
    #[validate(range(min = 0.05, max = 1.0))]
    pub resize_factor: f32,
}

fn default_edge_strength() -> f32 {
    0.8
}
fn default_edge_thickness() -> f32 {
    1.5
}
fn default_edge_threshold() -> Option<f32> {
    Some(0.3)
}
fn default_num_colors() -> u32 {
    8
}
fn default_smoothing() -> f32 {
    0.6
}
fn default_saturation() -> f32 {
    1.2
}
fn default_temporal_smoothing() -> f32 {
    DEFAULT_TEMPORAL_SMOOTHING
}
fn default_flow_weight() -> f32 {
    DEFAULT_FLOW_WEIGHT
}
fn default_preserve_black() -> bool {
    true
}
fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}
fn default_resize_factor() -> f32 {
    1.0
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            edge_strength: default_edge_strength(),
            edge_thickness: default_edge_thickness(),
            edge_threshold: default_edge_threshold(),
            num_colors: default_num_colors(),
            color_method: ColorMethod::default(),
            smoothing: default_smoothing(),
            saturation: default_saturation(),
            temporal_smoothing: default_temporal_smoothing(),
            flow_weight: default_flow_weight(),
            preserve_black: default_preserve_black(),
            batch_size: default_batch_size(),
            resize_factor: default_resize_factor(),
        }
    }
}

impl EffectParams {
    /// High-contrast line-art look: strong thin edges, muted color.
    pub fn sketch() -> Self {
        Self {
            edge_strength: 0.95,
            edge_thickness: 1.0,
            num_colors: 4,
            saturation: 0.8,
            ..Default::default()
        }
    }

    /// Flat poster look: posterized color, softer edges.
    pub fn poster() -> Self {
        Self {
            edge_strength: 0.6,
            color_method: ColorMethod::Posterize,
            num_colors: 6,
            saturation: 1.4,
            ..Default::default()
        }
    }

    /// Effective binarization threshold.
    ///
    /// Falls back to a strength-derived value when no explicit threshold
    /// was supplied: stronger edge settings admit fainter edges.
    pub fn effective_edge_threshold(&self) -> f32 {
        self.edge_threshold
            .unwrap_or_else(|| 0.2 * (1.0 - self.edge_strength))
    }

    /// Returns a new set with a different color count.
    pub fn with_num_colors(mut self, num_colors: u32) -> Self {
        self.num_colors = num_colors;
        self
    }

    /// Returns a new set with a different temporal smoothing weight.
    pub fn with_temporal_smoothing(mut self, weight: f32) -> Self {
        self.temporal_smoothing = weight;
        self
    }
}
