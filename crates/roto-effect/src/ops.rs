//! Raster primitives shared by the effect stages.
//!
//! Scalar maps live on `ndarray::Array2<f32>` indexed `[y, x]`;
//! color frames stay as `image::RgbImage`.

use image::RgbImage;
use ndarray::Array2;

/// Luma conversion, Rec. 601 weights, output in [0, 1].
pub fn rgb_to_gray(image: &RgbImage) -> Array2<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut gray = Array2::zeros((h, w));
    for (x, y, px) in image.enumerate_pixels() {
        let v = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
        gray[[y as usize, x as usize]] = v / 255.0;
    }
    gray
}

/// Light 3x3 Gaussian blur over a scalar map (separable [1 2 1] / 4).
pub fn gaussian3(src: &Array2<f32>) -> Array2<f32> {
    let (h, w) = src.dim();
    let mut tmp = Array2::zeros((h, w));
    let mut out = Array2::zeros((h, w));

    for y in 0..h {
        for x in 0..w {
            let xm = x.saturating_sub(1);
            let xp = (x + 1).min(w - 1);
            tmp[[y, x]] = (src[[y, xm]] + 2.0 * src[[y, x]] + src[[y, xp]]) / 4.0;
        }
    }
    for y in 0..h {
        let ym = y.saturating_sub(1);
        let yp = (y + 1).min(h - 1);
        for x in 0..w {
            out[[y, x]] = (tmp[[ym, x]] + 2.0 * tmp[[y, x]] + tmp[[yp, x]]) / 4.0;
        }
    }
    out
}

/// Light 3x3 Gaussian blur over an RGB frame, per channel.
pub fn gaussian3_rgb(image: &RgbImage) -> RgbImage {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let mut out = RgbImage::new(image.width(), image.height());

    let at = |x: i64, y: i64| {
        let x = x.clamp(0, w - 1) as u32;
        let y = y.clamp(0, h - 1) as u32;
        *image.get_pixel(x, y)
    };

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            let mut weight = 0.0f32;
            for (dy, wy) in [(-1i64, 1.0f32), (0, 2.0), (1, 1.0)] {
                for (dx, wx) in [(-1i64, 1.0f32), (0, 2.0), (1, 1.0)] {
                    let p = at(x + dx, y + dy);
                    let wgt = wx * wy;
                    for c in 0..3 {
                        acc[c] += wgt * p[c] as f32;
                    }
                    weight += wgt;
                }
            }
            let px = image::Rgb([
                (acc[0] / weight).round() as u8,
                (acc[1] / weight).round() as u8,
                (acc[2] / weight).round() as u8,
            ]);
            out.put_pixel(x as u32, y as u32, px);
        }
    }
    out
}

/// Rescale a scalar map to span [0, 1]. A flat map becomes all zeros.
pub fn normalize_minmax(map: &mut Array2<f32>) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in map.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    let range = max - min;
    if range <= f32::EPSILON {
        map.fill(0.0);
        return;
    }
    map.mapv_inplace(|v| (v - min) / range);
}

/// Binarize at a threshold: 1.0 where `v >= t`, else 0.0.
pub fn threshold(map: &Array2<f32>, t: f32) -> Array2<f32> {
    map.mapv(|v| if v >= t { 1.0 } else { 0.0 })
}

/// Binary dilation with a square kernel of the given radius.
pub fn dilate(mask: &Array2<f32>, radius: usize) -> Array2<f32> {
    morph(mask, radius, true)
}

/// Binary erosion with a square kernel of the given radius.
pub fn erode(mask: &Array2<f32>, radius: usize) -> Array2<f32> {
    morph(mask, radius, false)
}

fn morph(mask: &Array2<f32>, radius: usize, max: bool) -> Array2<f32> {
    if radius == 0 {
        return mask.clone();
    }
    let (h, w) = mask.dim();
    let r = radius as i64;
    let mut out = Array2::zeros((h, w));

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = if max { 0.0f32 } else { 1.0f32 };
            for dy in -r..=r {
                for dx in -r..=r {
                    let yy = (y + dy).clamp(0, h as i64 - 1) as usize;
                    let xx = (x + dx).clamp(0, w as i64 - 1) as usize;
                    let v = mask[[yy, xx]];
                    acc = if max { acc.max(v) } else { acc.min(v) };
                }
            }
            out[[y as usize, x as usize]] = acc;
        }
    }
    out
}

/// Clamped bilinear sample of a scalar map at fractional coordinates.
pub fn bilinear(map: &Array2<f32>, x: f32, y: f32) -> f32 {
    let (h, w) = map.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = map[[y0, x0]] * (1.0 - fx) + map[[y0, x1]] * fx;
    let bot = map[[y1, x0]] * (1.0 - fx) + map[[y1, x1]] * fx;
    top * (1.0 - fy) + bot * fy
}

/// `(1 - w) * current + w * previous`, elementwise.
pub fn blend(current: &Array2<f32>, previous: &Array2<f32>, w: f32) -> Array2<f32> {
    let mut out = current.clone();
    out.zip_mut_with(previous, |c, &p| *c = (1.0 - w) * *c + w * p);
    out
}

/// `(1 - w) * current + w * previous`, per channel.
pub fn blend_rgb(current: &RgbImage, previous: &RgbImage, w: f32) -> RgbImage {
    let mut out = current.clone();
    for (dst, src) in out.pixels_mut().zip(previous.pixels()) {
        for c in 0..3 {
            let v = (1.0 - w) * dst[c] as f32 + w * src[c] as f32;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_minmax() {
        let mut map = array![[1.0, 3.0], [2.0, 5.0]];
        normalize_minmax(&mut map);
        assert_eq!(map[[0, 0]], 0.0);
        assert_eq!(map[[1, 1]], 1.0);
        assert!((map[[1, 0]] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_flat_map() {
        let mut map = Array2::from_elem((4, 4), 0.7);
        normalize_minmax(&mut map);
        assert!(map.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let map = array![[0.29, 0.3, 0.31]];
        let mask = threshold(&map, 0.3);
        assert_eq!(mask[[0, 0]], 0.0);
        assert_eq!(mask[[0, 1]], 1.0);
        assert_eq!(mask[[0, 2]], 1.0);
    }

    #[test]
    fn test_dilate_grows_single_pixel() {
        let mut mask = Array2::zeros((5, 5));
        mask[[2, 2]] = 1.0;
        let grown = dilate(&mask, 1);
        assert_eq!(grown.iter().filter(|&&v| v == 1.0).count(), 9);
        assert_eq!(grown[[1, 1]], 1.0);
        assert_eq!(grown[[0, 0]], 0.0);
    }

    #[test]
    fn test_erode_removes_single_pixel() {
        let mut mask = Array2::zeros((5, 5));
        mask[[2, 2]] = 1.0;
        let shrunk = erode(&mask, 1);
        assert!(shrunk.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_bilinear_interpolates() {
        let map = array![[0.0, 1.0], [0.0, 1.0]];
        assert!((bilinear(&map, 0.5, 0.5) - 0.5).abs() < 1e-6);
        // Out-of-range coordinates clamp to the border
        assert_eq!(bilinear(&map, -5.0, 0.0), 0.0);
        assert_eq!(bilinear(&map, 5.0, 0.0), 1.0);
    }

    #[test]
    fn test_blend_weights() {
        let a = array![[1.0]];
        let b = array![[0.0]];
        assert_eq!(blend(&a, &b, 0.0)[[0, 0]], 1.0);
        assert_eq!(blend(&a, &b, 1.0)[[0, 0]], 0.0);
        assert!((blend(&a, &b, 0.3)[[0, 0]] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_gray_range() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 255, 255]));
        let gray = rgb_to_gray(&img);
        assert!((gray[[0, 0]] - 1.0).abs() < 1e-3);
        assert_eq!(gray[[0, 1]], 0.0);
    }
}
