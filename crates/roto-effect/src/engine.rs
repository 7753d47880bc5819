//! The per-frame effect engine.
//!
//! One engine instance serves a whole job: the edge model session is
//! loaded once and every frame flows through [`ScannerDarklyEngine::process_frame`]
//! with the job's [`EffectState`]. The engine itself is stateless
//! between calls; everything temporal lives in the state argument.

use std::path::Path;

use roto_media::Frame;
use roto_models::{EffectParams, EffectType};
use tracing::warn;

use crate::edge::{load_edge_model, EdgeModel};
use crate::flow;
use crate::ops;
use crate::quantize;
use crate::state::EffectState;

/// Seed for palette fitting. Fixed so identical frames quantize
/// identically across runs and workers.
pub const QUANT_SEED: u64 = 7919;

/// Brightness multiplier for the one-pixel band around edges.
const BORDER_DARKEN: f32 = 0.6;
/// Brightness multiplier for edge pixels when not rendered pure black.
const EDGE_DARKEN: f32 = 0.3;

/// The rotoscoping effect engine.
pub struct ScannerDarklyEngine {
    edge_model: Box<dyn EdgeModel>,
    params: EffectParams,
    degraded: bool,
}

/// Construct the engine for a compiled-in effect type.
pub fn build_engine(
    effect: EffectType,
    params: EffectParams,
    model_path: Option<&Path>,
) -> ScannerDarklyEngine {
    match effect {
        EffectType::ScannerDarkly => ScannerDarklyEngine::new(params, model_path),
    }
}

impl ScannerDarklyEngine {
    /// Create an engine, loading the HED model from `model_path` and
    /// degrading to Sobel gradients if that fails.
    pub fn new(params: EffectParams, model_path: Option<&Path>) -> Self {
        let (edge_model, degraded) = load_edge_model(model_path);
        Self {
            edge_model,
            params,
            degraded,
        }
    }

    /// Create an engine around an explicit edge model.
    pub fn with_model(params: EffectParams, edge_model: Box<dyn EdgeModel>) -> Self {
        Self {
            edge_model,
            params,
            degraded: false,
        }
    }

    /// True when running on the Sobel fallback instead of HED.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }

    /// Apply the effect to one frame, updating temporal state.
    ///
    /// Inference failure is not fatal: the original frame passes
    /// through and only the grayscale state advances, so the next
    /// frame still has something to track motion against.
    pub fn process_frame(&self, frame: &Frame, state: &mut EffectState) -> Frame {
        let image = &frame.image;
        let gray = ops::rgb_to_gray(image);
        let ts = self.params.temporal_smoothing;

        // Edge detection on a lightly denoised frame
        let denoised = ops::gaussian3_rgb(image);
        let mut edges = match self.edge_model.detect(&denoised) {
            Ok(edges) => edges,
            Err(e) => {
                warn!(
                    frame = frame.index,
                    model = self.edge_model.name(),
                    error = %e,
                    "Edge inference failed, passing frame through unmodified"
                );
                state.prev_gray = Some(gray);
                return frame.clone();
            }
        };

        // Temporal edge blend, skipped on the first frame
        if ts > 0.0 {
            if let Some(prev) = &state.prev_edges {
                if prev.dim() == edges.dim() {
                    edges = ops::blend(&edges, prev, ts);
                }
            }
        }
        state.prev_edges = Some(edges.clone());

        // Contrast shaping: normalize, then a strength-driven power curve
        ops::normalize_minmax(&mut edges);
        let exponent = 1.0 - self.params.edge_strength * 0.5;
        edges.mapv_inplace(|v| v.powf(exponent));

        let mut mask = ops::threshold(&edges, self.params.effective_edge_threshold());

        // Line weight: square kernel of size floor(thickness * 1.5)
        let thickness = self.params.edge_thickness;
        if thickness > 1.0 {
            let kernel = ((thickness * 1.5) as usize).max(1);
            mask = ops::dilate(&mask, (kernel / 2).max(1));
        } else if thickness < 1.0 {
            mask = ops::erode(&mask, 1);
        }

        // Drag the previous mask along scene motion and mix it in
        let mut flow_field = None;
        if self.params.flow_weight > 0.0 {
            if let (Some(prev_gray), Some(prev_mask)) = (&state.prev_gray, &state.prev_mask) {
                if prev_gray.dim() == gray.dim() && prev_mask.dim() == mask.dim() {
                    let field = flow::estimate_flow(prev_gray, &gray);
                    let warped = flow::warp_scalar(prev_mask, &field);
                    mask = ops::blend(&mask, &warped, self.params.flow_weight);
                    mask = ops::threshold(&mask, 0.5);
                    flow_field = Some(field);
                }
            }
        }
        state.prev_mask = Some(mask.clone());

        // Flat color
        let mut quantized = quantize::quantize_frame(image, &self.params, QUANT_SEED);
        if ts > 0.0 {
            if let Some(prev_q) = &state.prev_quantized {
                if prev_q.dimensions() == quantized.dimensions() {
                    quantized = match &flow_field {
                        Some(field) => {
                            let warped = flow::warp_rgb(prev_q, field);
                            ops::blend_rgb(&quantized, &warped, ts * 0.5)
                        }
                        None => ops::blend_rgb(&quantized, prev_q, ts),
                    };
                }
            }
        }
        state.prev_quantized = Some(quantized.clone());

        // Composite edges over color, with a softened halo just
        // outside the line
        let halo = ops::dilate(&mask, 1);
        let mut result = quantized;
        for (x, y, px) in result.enumerate_pixels_mut() {
            let idx = [y as usize, x as usize];
            if mask[idx] >= 0.5 {
                if self.params.preserve_black {
                    *px = image::Rgb([0, 0, 0]);
                } else {
                    for c in 0..3 {
                        px[c] = (px[c] as f32 * EDGE_DARKEN) as u8;
                    }
                }
            } else if halo[idx] >= 0.5 {
                for c in 0..3 {
                    px[c] = (px[c] as f32 * BORDER_DARKEN) as u8;
                }
            }
        }

        // Final stabilization pass against the previous composite
        if let Some(prev_result) = &state.prev_result {
            if prev_result.dimensions() == result.dimensions() {
                let weight = (ts * 0.5).min(0.2);
                if weight > 0.0 {
                    result = ops::blend_rgb(&result, prev_result, weight);
                }
            }
        }

        state.prev_result = Some(result.clone());
        state.prev_gray = Some(gray);

        Frame::new(frame.index, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::SobelModel;
    use crate::error::{EffectError, EffectResult};
    use image::RgbImage;
    use ndarray::Array2;

    struct FailingModel;

    impl EdgeModel for FailingModel {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn detect(&self, _image: &RgbImage) -> EffectResult<Array2<f32>> {
            Err(EffectError::inference_failed("synthetic failure"))
        }
    }

    /// White square on dark gray, slightly offset per frame index.
    fn square_frame(index: u64, offset: u32) -> Frame {
        let mut img = RgbImage::new(32, 32);
        for (_, _, px) in img.enumerate_pixels_mut() {
            *px = image::Rgb([40, 40, 40]);
        }
        for y in 8..20 {
            for x in (8 + offset)..(20 + offset) {
                img.put_pixel(x.min(31), y, image::Rgb([230, 230, 230]));
            }
        }
        Frame::new(index, img)
    }

    fn test_engine(params: EffectParams) -> ScannerDarklyEngine {
        ScannerDarklyEngine::with_model(params, Box::new(SobelModel::new()))
    }

    #[test]
    fn test_output_preserves_index_and_dimensions() {
        let engine = test_engine(EffectParams::default());
        let mut state = EffectState::new();
        let out = engine.process_frame(&square_frame(5, 0), &mut state);
        assert_eq!(out.index, 5);
        assert_eq!(out.width(), 32);
        assert_eq!(out.height(), 32);
    }

    #[test]
    fn test_edges_rendered_black() {
        let params = EffectParams::default();
        assert!(params.preserve_black);
        let engine = test_engine(params);
        let mut state = EffectState::new();
        let out = engine.process_frame(&square_frame(0, 0), &mut state);

        let black = out
            .image
            .pixels()
            .filter(|p| p[0] == 0 && p[1] == 0 && p[2] == 0)
            .count();
        assert!(black > 0, "edge ring should be solid black");
    }

    #[test]
    fn test_deterministic_across_runs() {
        let frames: Vec<Frame> = (0..4).map(|i| square_frame(i, (i / 2) as u32)).collect();

        let run = || {
            let engine = test_engine(EffectParams::default());
            let mut state = EffectState::new();
            frames
                .iter()
                .map(|f| engine.process_frame(f, &mut state).image.into_raw())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_state_carries_across_batch_boundary() {
        let frames: Vec<Frame> = (0..4).map(|i| square_frame(i, i as u32)).collect();
        let engine = test_engine(EffectParams::default());

        // One continuous state across a simulated batch split
        let mut state = EffectState::new();
        let continuous: Vec<_> = frames
            .iter()
            .map(|f| engine.process_frame(f, &mut state).image.into_raw())
            .collect();

        // Same split, but state wrongly reset at the boundary
        let mut state = EffectState::new();
        let mut reset: Vec<_> = frames[..2]
            .iter()
            .map(|f| engine.process_frame(f, &mut state).image.into_raw())
            .collect();
        state = EffectState::new();
        reset.extend(
            frames[2..]
                .iter()
                .map(|f| engine.process_frame(f, &mut state).image.into_raw()),
        );

        assert_eq!(continuous[..2], reset[..2]);
        assert_ne!(
            continuous[2], reset[2],
            "post-boundary frames must see the carried state"
        );
    }

    #[test]
    fn test_no_temporal_smoothing_means_no_flicker_on_static_input() {
        let params = EffectParams::default()
            .with_temporal_smoothing(0.0)
            .with_num_colors(2);
        let engine = test_engine(params);
        let mut state = EffectState::new();

        let frame = square_frame(0, 0);
        let first = engine.process_frame(&frame, &mut state).image.into_raw();
        let second = engine.process_frame(&frame, &mut state).image.into_raw();
        assert_eq!(first, second, "static input must be rock solid");
    }

    #[test]
    fn test_inference_failure_passes_frame_through() {
        let engine =
            ScannerDarklyEngine::with_model(EffectParams::default(), Box::new(FailingModel));
        let mut state = EffectState::new();

        let frame = square_frame(0, 0);
        let out = engine.process_frame(&frame, &mut state);
        assert_eq!(out.image.as_raw(), frame.image.as_raw());
        // Grayscale still advances so the next frame can track motion
        assert!(state.prev_gray.is_some());
        assert!(state.prev_mask.is_none());
    }

    #[test]
    fn test_build_engine_registry() {
        let engine = build_engine(EffectType::ScannerDarkly, EffectParams::default(), None);
        assert!(engine.is_degraded());
    }
}
