//! Dense optical flow by block matching.
//!
//! Deliberately coarse: an 8x8 block search on half-resolution luma,
//! bilinearly upsampled to a per-pixel field. That is enough to drag
//! the previous frame's mask along with scene motion; sub-pixel
//! accuracy buys nothing after binarization.

use image::RgbImage;
use ndarray::Array2;

use crate::ops;

/// Block edge length on the downscaled grid.
const BLOCK: usize = 8;
/// Search radius in downscaled pixels.
const SEARCH: i64 = 4;
/// Downscale factor before matching.
const DOWNSCALE: usize = 2;

/// Per-pixel displacement field, in full-resolution pixels, mapping
/// the previous frame onto the current one.
#[derive(Debug, Clone)]
pub struct FlowField {
    pub dx: Array2<f32>,
    pub dy: Array2<f32>,
}

/// Estimate flow from the previous to the current grayscale frame.
pub fn estimate_flow(prev_gray: &Array2<f32>, cur_gray: &Array2<f32>) -> FlowField {
    let (h, w) = cur_gray.dim();

    let prev_small = downsample(prev_gray, DOWNSCALE);
    let cur_small = downsample(cur_gray, DOWNSCALE);
    let (sh, sw) = cur_small.dim();

    let blocks_y = (sh / BLOCK).max(1);
    let blocks_x = (sw / BLOCK).max(1);
    let mut coarse_dx = Array2::zeros((blocks_y, blocks_x));
    let mut coarse_dy = Array2::zeros((blocks_y, blocks_x));

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let y0 = by * BLOCK;
            let x0 = bx * BLOCK;
            let (dx, dy) = match_block(&prev_small, &cur_small, x0, y0);
            // Back to full-resolution displacement
            coarse_dx[[by, bx]] = dx as f32 * DOWNSCALE as f32;
            coarse_dy[[by, bx]] = dy as f32 * DOWNSCALE as f32;
        }
    }

    // Bilinear upsample block grid to per-pixel field
    let cell = (BLOCK * DOWNSCALE) as f32;
    let mut dx = Array2::zeros((h, w));
    let mut dy = Array2::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let gx = (x as f32 + 0.5) / cell - 0.5;
            let gy = (y as f32 + 0.5) / cell - 0.5;
            dx[[y, x]] = ops::bilinear(&coarse_dx, gx, gy);
            dy[[y, x]] = ops::bilinear(&coarse_dy, gx, gy);
        }
    }

    FlowField { dx, dy }
}

/// Best SAD match for the block at (x0, y0) of the current frame
/// within the previous frame's search window.
fn match_block(prev: &Array2<f32>, cur: &Array2<f32>, x0: usize, y0: usize) -> (i64, i64) {
    let (h, w) = cur.dim();
    let mut best = (0i64, 0i64);
    let mut best_sad = f32::INFINITY;

    for dy in -SEARCH..=SEARCH {
        for dx in -SEARCH..=SEARCH {
            let mut sad = 0.0f32;
            for by in 0..BLOCK {
                for bx in 0..BLOCK {
                    let cy = (y0 + by).min(h - 1);
                    let cx = (x0 + bx).min(w - 1);
                    let py = (cy as i64 - dy).clamp(0, h as i64 - 1) as usize;
                    let px = (cx as i64 - dx).clamp(0, w as i64 - 1) as usize;
                    sad += (cur[[cy, cx]] - prev[[py, px]]).abs();
                }
            }
            // Bias toward zero motion on ties
            if sad < best_sad - 1e-6 {
                best_sad = sad;
                best = (dx, dy);
            }
        }
    }
    best
}

/// Average-pool downsample by an integer factor.
fn downsample(src: &Array2<f32>, factor: usize) -> Array2<f32> {
    let (h, w) = src.dim();
    let oh = (h / factor).max(1);
    let ow = (w / factor).max(1);
    let mut out = Array2::zeros((oh, ow));

    for y in 0..oh {
        for x in 0..ow {
            let mut acc = 0.0;
            let mut n = 0.0;
            for dy in 0..factor {
                for dx in 0..factor {
                    let sy = (y * factor + dy).min(h - 1);
                    let sx = (x * factor + dx).min(w - 1);
                    acc += src[[sy, sx]];
                    n += 1.0;
                }
            }
            out[[y, x]] = acc / n;
        }
    }
    out
}

/// Warp a scalar map by the flow field (inverse mapping, clamped
/// bilinear sampling).
pub fn warp_scalar(src: &Array2<f32>, flow: &FlowField) -> Array2<f32> {
    let (h, w) = src.dim();
    let mut out = Array2::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let sx = x as f32 - flow.dx[[y, x]];
            let sy = y as f32 - flow.dy[[y, x]];
            out[[y, x]] = ops::bilinear(src, sx, sy);
        }
    }
    out
}

/// Warp an RGB frame by the flow field.
pub fn warp_rgb(src: &RgbImage, flow: &FlowField) -> RgbImage {
    let (w, h) = (src.width(), src.height());
    let mut out = RgbImage::new(w, h);

    let sample = |x: f32, y: f32, c: usize| -> f32 {
        let x = x.clamp(0.0, (w - 1) as f32);
        let y = y.clamp(0.0, (h - 1) as f32);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = src.get_pixel(x0, y0)[c] as f32 * (1.0 - fx) + src.get_pixel(x1, y0)[c] as f32 * fx;
        let bot = src.get_pixel(x0, y1)[c] as f32 * (1.0 - fx) + src.get_pixel(x1, y1)[c] as f32 * fx;
        top * (1.0 - fy) + bot * fy
    };

    for y in 0..h {
        for x in 0..w {
            let sx = x as f32 - flow.dx[[y as usize, x as usize]];
            let sy = y as f32 - flow.dy[[y as usize, x as usize]];
            let px = image::Rgb([
                sample(sx, sy, 0).round() as u8,
                sample(sx, sy, 1).round() as u8,
                sample(sx, sy, 2).round() as u8,
            ]);
            out.put_pixel(x, y, px);
        }
    }
    out
}
