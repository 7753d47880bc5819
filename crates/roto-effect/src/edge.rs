//! Edge detection models.
//!
//! The primary model is HED (holistically-nested edge detection) run
//! through ONNX Runtime. When the model file is missing or fails to
//! load, the worker degrades to a Sobel gradient model instead of
//! refusing jobs; the output is cruder but deterministic.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::warn;

use crate::error::{EffectError, EffectResult};
use crate::ops;

/// HED was trained on mean-subtracted BGR input; these are the
/// per-channel means in BGR order.
pub const HED_MEAN_BGR: [f32; 3] = [104.006_99, 116.668_77, 122.678_91];

/// Produces an edge confidence map in [0, 1] per pixel.
pub trait EdgeModel: Send {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Detect edges in an RGB frame.
    fn detect(&self, image: &RgbImage) -> EffectResult<Array2<f32>>;
}

/// HED edge detection via ONNX Runtime.
#[derive(Debug)]
pub struct HedModel {
    session: Mutex<Session>,
    output_name: String,
}

impl HedModel {
    /// Load the model from an ONNX file.
    pub fn load(model_path: &Path) -> EffectResult<Self> {
        if !model_path.exists() {
            return Err(EffectError::ModelNotFound(model_path.to_path_buf()));
        }

        let model_bytes = std::fs::read(model_path)
            .map_err(|e| EffectError::model_load_failed(format!("ORT read model file: {e}")))?;

        let session = Session::builder()
            .map_err(|e| EffectError::model_load_failed(format!("ORT session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EffectError::model_load_failed(format!("ORT opt level: {e}")))?
            .commit_from_memory(model_bytes.as_slice())
            .map_err(|e| EffectError::model_load_failed(format!("ORT load model: {e}")))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| EffectError::model_load_failed("model declares no outputs"))?;

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl EdgeModel for HedModel {
    fn name(&self) -> &'static str {
        "hed"
    }

    fn detect(&self, image: &RgbImage) -> EffectResult<Array2<f32>> {
        let (w, h) = (image.width() as usize, image.height() as usize);

        let tensor = rgb_to_hed_tensor(image)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EffectError::inference_failed("ORT session poisoned"))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| EffectError::inference_failed(format!("ORT run failed: {e}")))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| EffectError::inference_failed("ORT returned no outputs"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EffectError::inference_failed(format!("ORT extract: {e}")))?;

        // Expect (1,1,H,W); accept (H,W) too
        let expected = w * h;
        if data.len() < expected {
            return Err(EffectError::inference_failed(format!(
                "edge map has {} values for {}x{} frame (shape {:?})",
                data.len(),
                w,
                h,
                shape
            )));
        }

        let mut edges = Array2::zeros((h, w));
        for y in 0..h {
            for x in 0..w {
                edges[[y, x]] = data[y * w + x].clamp(0.0, 1.0);
            }
        }
        Ok(edges)
    }
}

/// Convert an RGB frame to the HED input tensor (1,3,H,W), BGR channel
/// order with per-channel mean subtraction.
fn rgb_to_hed_tensor(image: &RgbImage) -> EffectResult<Value> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 {
        return Err(EffectError::invalid_input("empty frame"));
    }

    let mut chw = Vec::with_capacity(3 * h * w);
    // RGB channel index for each BGR plane
    for (plane, rgb_c) in [(0usize, 2usize), (1, 1), (2, 0)] {
        for y in 0..h {
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32)[rgb_c] as f32;
                chw.push(v - HED_MEAN_BGR[plane]);
            }
        }
    }

    let shape = vec![1usize, 3, h, w];
    let boxed = chw.into_boxed_slice();
    Tensor::from_array((shape, boxed))
        .map(Value::from)
        .map_err(|e| EffectError::inference_failed(format!("ORT tensor: {e}")))
}

/// Sobel gradient magnitude fallback.
///
/// No learned model, no runtime dependency: just horizontal and
/// vertical 3x3 gradients over luma, magnitude normalized to [0, 1].
#[derive(Debug, Default)]
pub struct SobelModel;

impl SobelModel {
    pub fn new() -> Self {
        Self
    }
}

impl EdgeModel for SobelModel {
    fn name(&self) -> &'static str {
        "sobel"
    }

    fn detect(&self, image: &RgbImage) -> EffectResult<Array2<f32>> {
        let gray = ops::rgb_to_gray(image);
        let (h, w) = gray.dim();
        let mut edges = Array2::zeros((h, w));

        let at = |y: i64, x: i64| {
            let y = y.clamp(0, h as i64 - 1) as usize;
            let x = x.clamp(0, w as i64 - 1) as usize;
            gray[[y, x]]
        };

        for y in 0..h as i64 {
            for x in 0..w as i64 {
                let gx = at(y - 1, x + 1) + 2.0 * at(y, x + 1) + at(y + 1, x + 1)
                    - at(y - 1, x - 1)
                    - 2.0 * at(y, x - 1)
                    - at(y + 1, x - 1);
                let gy = at(y + 1, x - 1) + 2.0 * at(y + 1, x) + at(y + 1, x + 1)
                    - at(y - 1, x - 1)
                    - 2.0 * at(y - 1, x)
                    - at(y - 1, x + 1);
                // Max gradient magnitude for Sobel on [0,1] luma
                edges[[y as usize, x as usize]] = (gx * gx + gy * gy).sqrt() / (4.0 * 2.0f32.sqrt());
            }
        }
        Ok(edges)
    }
}

/// Load the configured edge model, degrading to Sobel on failure.
///
/// Returns the model and whether the worker is running degraded.
pub fn load_edge_model(model_path: Option<&Path>) -> (Box<dyn EdgeModel>, bool) {
    match model_path {
        Some(path) => match HedModel::load(path) {
            Ok(model) => (Box::new(model), false),
            Err(e) => {
                warn!(
                    model = %path.display(),
                    error = %e,
                    "Edge model unavailable, falling back to Sobel gradients"
                );
                (Box::new(SobelModel::new()), true)
            }
        },
        None => {
            warn!("No edge model configured, using Sobel gradients");
            (Box::new(SobelModel::new()), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertical_split_frame() -> RgbImage {
        let mut img = RgbImage::new(16, 16);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = if x < 8 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            };
        }
        img
    }

    #[test]
    fn test_sobel_finds_vertical_boundary() {
        let edges = SobelModel::new().detect(&vertical_split_frame()).unwrap();
        // Strongest response along the split, none in flat regions
        assert!(edges[[8, 7]] > 0.5);
        assert!(edges[[8, 2]] < 1e-3);
        assert!(edges[[8, 13]] < 1e-3);
    }

    #[test]
    fn test_sobel_output_in_unit_range() {
        let edges = SobelModel::new().detect(&vertical_split_frame()).unwrap();
        assert!(edges.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_sobel_is_deterministic() {
        let frame = vertical_split_frame();
        let a = SobelModel::new().detect(&frame).unwrap();
        let b = SobelModel::new().detect(&frame).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_model_degrades() {
        let (model, degraded) = load_edge_model(Some(Path::new("/nonexistent/hed.onnx")));
        assert!(degraded);
        assert_eq!(model.name(), "sobel");
    }

    #[test]
    fn test_hed_load_reports_missing_file() {
        let err = HedModel::load(Path::new("/nonexistent/hed.onnx")).unwrap_err();
        assert!(matches!(err, EffectError::ModelNotFound(_)));
    }
}
