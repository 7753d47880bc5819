//! Color quantization in CIELAB space.
//!
//! All three methods share the same frame: convert to Lab, optionally
//! smooth, collapse the palette, scale chroma, convert back. K-means
//! is the default; its init is seeded, so identical input yields an
//! identical palette.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use roto_models::{ColorMethod, EffectParams};

/// Cap on pixels sampled for palette fitting.
const PALETTE_SAMPLE_CAP: usize = 10_000;
/// K-means iteration budget.
const KMEANS_MAX_ITERS: usize = 10;
/// Convergence threshold on centroid movement, in Lab units.
const KMEANS_EPS: f32 = 0.2;

/// Quantize a frame's colors.
pub fn quantize_frame(image: &RgbImage, params: &EffectParams, seed: u64) -> RgbImage {
    let smoothed = if params.smoothing > 0.0 {
        bilateral_smooth(image, params.smoothing)
    } else {
        image.clone()
    };

    let lab: Vec<[f32; 3]> = smoothed
        .pixels()
        .map(|p| srgb_to_lab([p[0], p[1], p[2]]))
        .collect();

    let quantized_lab: Vec<[f32; 3]> = match params.color_method {
        ColorMethod::Kmeans => {
            let palette = kmeans_palette(&lab, params.num_colors as usize, seed);
            lab.par_iter()
                .map(|px| palette[nearest_centroid(px, &palette)])
                .collect()
        }
        ColorMethod::Bilateral => {
            // Smoothing already applied; collapse to coarse levels
            let levels = posterize_levels(params.num_colors);
            lab.iter().map(|px| posterize_lab(px, levels)).collect()
        }
        ColorMethod::Posterize => {
            let levels = posterize_levels(params.num_colors);
            lab.iter().map(|px| posterize_lab(px, levels)).collect()
        }
    };

    let mut out = RgbImage::new(image.width(), image.height());
    for (dst, px) in out.pixels_mut().zip(quantized_lab.iter()) {
        let mut px = *px;
        // Chroma scaling; L is untouched
        px[1] *= params.saturation;
        px[2] *= params.saturation;
        let rgb = lab_to_srgb(px);
        *dst = image::Rgb(rgb);
    }
    out
}

/// Per-channel level count approximating `num_colors` total colors.
fn posterize_levels(num_colors: u32) -> u32 {
    ((num_colors as f32).cbrt().round() as u32).max(2)
}

fn posterize_lab(px: &[f32; 3], levels: u32) -> [f32; 3] {
    let steps = (levels - 1) as f32;
    let quant = |v: f32, lo: f32, hi: f32| {
        let t = ((v - lo) / (hi - lo)).clamp(0.0, 1.0);
        lo + (t * steps).round() / steps * (hi - lo)
    };
    [
        quant(px[0], 0.0, 100.0),
        quant(px[1], -110.0, 110.0),
        quant(px[2], -110.0, 110.0),
    ]
}

/// Edge-preserving 5x5 bilateral smoothing; `amount` scales the color
/// sigma, so 0 is a no-op and 1 smooths aggressively.
pub fn bilateral_smooth(image: &RgbImage, amount: f32) -> RgbImage {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let sigma_color = 10.0 + 40.0 * amount;
    let sigma_space = 2.0f32;
    let radius = 2i64;

    let mut out = RgbImage::new(image.width(), image.height());
    let rows: Vec<Vec<image::Rgb<u8>>> = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut row = Vec::with_capacity(w as usize);
            for x in 0..w {
                let center = *image.get_pixel(x as u32, y as u32);
                let mut acc = [0.0f32; 3];
                let mut total = 0.0f32;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let xx = (x + dx).clamp(0, w - 1) as u32;
                        let yy = (y + dy).clamp(0, h - 1) as u32;
                        let p = *image.get_pixel(xx, yy);

                        let spatial = ((dx * dx + dy * dy) as f32)
                            / (2.0 * sigma_space * sigma_space);
                        let dc: f32 = (0..3)
                            .map(|c| (p[c] as f32 - center[c] as f32).powi(2))
                            .sum();
                        let range = dc / (2.0 * sigma_color * sigma_color);
                        let weight = (-spatial - range).exp();

                        for c in 0..3 {
                            acc[c] += weight * p[c] as f32;
                        }
                        total += weight;
                    }
                }
                row.push(image::Rgb([
                    (acc[0] / total).round() as u8,
                    (acc[1] / total).round() as u8,
                    (acc[2] / total).round() as u8,
                ]));
            }
            row
        })
        .collect();

    for (y, row) in rows.into_iter().enumerate() {
        for (x, px) in row.into_iter().enumerate() {
            out.put_pixel(x as u32, y as u32, px);
        }
    }
    out
}

/// Fit a k-color palette with seeded k-means++ init.
pub fn kmeans_palette(pixels: &[[f32; 3]], k: usize, seed: u64) -> Vec<[f32; 3]> {
    if pixels.is_empty() || k == 0 {
        return vec![[0.0, 0.0, 0.0]];
    }

    let stride = (pixels.len() / PALETTE_SAMPLE_CAP).max(1);
    let samples: Vec<[f32; 3]> = pixels.iter().step_by(stride).copied().collect();
    let k = k.min(samples.len());

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = kmeans_pp_init(&samples, k, &mut rng);

    for _ in 0..KMEANS_MAX_ITERS {
        let mut sums = vec![[0.0f32; 3]; k];
        let mut counts = vec![0usize; k];
        for px in &samples {
            let c = nearest_centroid(px, &centroids);
            for i in 0..3 {
                sums[c][i] += px[i];
            }
            counts[c] += 1;
        }

        let mut max_shift = 0.0f32;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let next = [
                sums[c][0] / counts[c] as f32,
                sums[c][1] / counts[c] as f32,
                sums[c][2] / counts[c] as f32,
            ];
            max_shift = max_shift.max(dist2(&next, &centroids[c]).sqrt());
            centroids[c] = next;
        }
        if max_shift < KMEANS_EPS {
            break;
        }
    }

    centroids
}

fn kmeans_pp_init(samples: &[[f32; 3]], k: usize, rng: &mut StdRng) -> Vec<[f32; 3]> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(samples[rng.random_range(0..samples.len())]);

    while centroids.len() < k {
        let weights: Vec<f32> = samples
            .iter()
            .map(|px| {
                centroids
                    .iter()
                    .map(|c| dist2(px, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let total: f32 = weights.iter().sum();
        if total <= f32::EPSILON {
            // All remaining pixels coincide with a centroid
            centroids.push(samples[rng.random_range(0..samples.len())]);
            continue;
        }

        let mut r = rng.random_range(0.0..total);
        let mut chosen = samples.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if r < *w {
                chosen = i;
                break;
            }
            r -= w;
        }
        centroids.push(samples[chosen]);
    }

    centroids
}

pub(crate) fn nearest_centroid(px: &[f32; 3], centroids: &[[f32; 3]]) -> usize {
    let mut best = 0;
    let mut best_d = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = dist2(px, c);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

fn dist2(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

/// sRGB (D65) to CIELAB.
pub fn srgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let lin = |c: u8| {
        let c = c as f32 / 255.0;
        if c > 0.04045 {
            ((c + 0.055) / 1.055).powf(2.4)
        } else {
            c / 12.92
        }
    };
    let (r, g, b) = (lin(rgb[0]), lin(rgb[1]), lin(rgb[2]));

    // D65 white point
    let x = (0.4124 * r + 0.3576 * g + 0.1805 * b) / 0.95047;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = (0.0193 * r + 0.1192 * g + 0.9505 * b) / 1.08883;

    let f = |t: f32| {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let (fx, fy, fz) = (f(x), f(y), f(z));

    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// CIELAB back to sRGB, clamped.
pub fn lab_to_srgb(lab: [f32; 3]) -> [u8; 3] {
    let fy = (lab[0] + 16.0) / 116.0;
    let fx = fy + lab[1] / 500.0;
    let fz = fy - lab[2] / 200.0;

    let finv = |t: f32| {
        let t3 = t * t * t;
        if t3 > 0.008856 {
            t3
        } else {
            (t - 16.0 / 116.0) / 7.787
        }
    };
    let x = finv(fx) * 0.95047;
    let y = finv(fy);
    let z = finv(fz) * 1.08883;

    let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let b = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    let gamma = |c: f32| {
        let c = c.clamp(0.0, 1.0);
        let v = if c > 0.0031308 {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        } else {
            12.92 * c
        };
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    };

    [gamma(r), gamma(g), gamma(b)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn two_tone_frame() -> RgbImage {
        let mut img = RgbImage::new(16, 16);
        for (x, _, px) in img.enumerate_pixels_mut() {
            *px = if x < 8 {
                image::Rgb([200, 40, 40])
            } else {
                image::Rgb([40, 40, 200])
            };
        }
        img
    }

    fn distinct_colors(img: &RgbImage) -> usize {
        img.pixels()
            .map(|p| (p[0], p[1], p[2]))
            .collect::<HashSet<_>>()
            .len()
    }

    #[test]
    fn test_lab_roundtrip_stays_close() {
        for rgb in [[0u8, 0, 0], [255, 255, 255], [200, 40, 40], [17, 130, 90]] {
            let back = lab_to_srgb(srgb_to_lab(rgb));
            for c in 0..3 {
                assert!(
                    (back[c] as i16 - rgb[c] as i16).abs() <= 2,
                    "channel {c} of {rgb:?} drifted to {back:?}"
                );
            }
        }
    }

    #[test]
    fn test_kmeans_is_deterministic() {
        let pixels: Vec<[f32; 3]> = (0..500)
            .map(|i| [(i % 97) as f32, (i % 31) as f32 - 15.0, (i % 53) as f32 - 26.0])
            .collect();
        let a = kmeans_palette(&pixels, 4, 7919);
        let b = kmeans_palette(&pixels, 4, 7919);
        assert_eq!(a, b);
    }

    #[test]
    fn test_quantize_collapses_palette() {
        let params = EffectParams::default().with_num_colors(2);
        let out = quantize_frame(&two_tone_frame(), &params, 7919);
        // Two clean regions can pick up a couple of boundary colors
        // from smoothing, never a full gradient
        assert!(distinct_colors(&out) <= 4);
    }

    #[test]
    fn test_quantize_same_input_same_output() {
        let frame = two_tone_frame();
        let params = EffectParams::default();
        let a = quantize_frame(&frame, &params, 7919);
        let b = quantize_frame(&frame, &params, 7919);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_posterize_levels() {
        assert_eq!(posterize_levels(8), 2);
        assert_eq!(posterize_levels(27), 3);
        assert_eq!(posterize_levels(2), 2);
    }

    #[test]
    fn test_bilateral_zero_sigma_preserves_flat_regions() {
        let frame = two_tone_frame();
        let out = bilateral_smooth(&frame, 0.5);
        // Interior of a flat region is unchanged
        assert_eq!(out.get_pixel(2, 8), frame.get_pixel(2, 8));
    }
}
