//! Per-job temporal state.

use image::RgbImage;
use ndarray::Array2;

/// Everything the effect remembers between consecutive frames.
///
/// One instance per job, created empty before the first frame and
/// threaded `&mut` through every call. Batch boundaries are invisible
/// here: the state only resets when a new job constructs a fresh one.
#[derive(Debug, Default)]
pub struct EffectState {
    /// Temporally blended edge confidence from the previous frame
    pub prev_edges: Option<Array2<f32>>,
    /// Binary edge mask from the previous frame
    pub prev_mask: Option<Array2<f32>>,
    /// Quantized colors from the previous frame
    pub prev_quantized: Option<RgbImage>,
    /// Final composited result from the previous frame
    pub prev_result: Option<RgbImage>,
    /// Grayscale of the previous frame, for optical flow
    pub prev_gray: Option<Array2<f32>>,
}

impl EffectState {
    /// Fresh state, as for the first frame of a job.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once at least one frame has been processed.
    pub fn is_warm(&self) -> bool {
        self.prev_gray.is_some()
    }
}
