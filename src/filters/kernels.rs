//! Pixel arithmetic shared by the filter stages

use image::RgbaImage;

use crate::error::Result;
use crate::format::BufferPool;

/// 256-entry tone curve
pub type Lut = [u8; 256];

pub fn identity_lut() -> Lut {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = i as u8;
    }
    lut
}

pub fn build_lut(f: impl Fn(f32) -> f32) -> Lut {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (f(i as f32 / 255.0) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

pub fn apply_lut(image: &mut RgbaImage, lut: &Lut) {
    for px in image.pixels_mut() {
        px[0] = lut[px[0] as usize];
        px[1] = lut[px[1] as usize];
        px[2] = lut[px[2] as usize];
    }
}

pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

pub fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

pub fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    clamp_u8(a as f32 + (b as f32 - a as f32) * t)
}

/// RGB in `[0, 1]` to (hue degrees, saturation, value)
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

    (hue, saturation, max)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let h = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (r + m, g + m, b + m)
}

/// Scale saturation in HSV space, clamping S to `[0, 1]`
pub fn saturate(image: &mut RgbaImage, factor: f32) {
    for px in image.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0);
        let (r, g, b) = hsv_to_rgb(h, (s * factor).clamp(0.0, 1.0), v);
        px[0] = clamp_u8(r * 255.0);
        px[1] = clamp_u8(g * 255.0);
        px[2] = clamp_u8(b * 255.0);
    }
}

/// Sliding-window mean along one axis with edge extension
fn box_pass(src: &RgbaImage, dst: &mut RgbaImage, radius: usize, horizontal: bool) {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (lines, len) = if horizontal { (height, width) } else { (width, height) };
    let window = (2 * radius + 1) as u32;
    let src: &[u8] = src.as_raw();
    let dst: &mut [u8] = dst;

    let index = |line: usize, i: usize| -> usize {
        if horizontal {
            (line * width + i) * 4
        } else {
            (i * width + line) * 4
        }
    };

    for line in 0..lines {
        let mut sum = [0u32; 4];
        for k in 0..=2 * radius {
            let i = k.saturating_sub(radius).min(len - 1);
            let at = index(line, i);
            for c in 0..4 {
                sum[c] += src[at + c] as u32;
            }
        }

        for i in 0..len {
            let at = index(line, i);
            for c in 0..4 {
                dst[at + c] = ((sum[c] + window / 2) / window) as u8;
            }

            let incoming = index(line, (i + radius + 1).min(len - 1));
            let outgoing = index(line, i.saturating_sub(radius));
            for c in 0..4 {
                sum[c] = sum[c] + src[incoming + c] as u32 - src[outgoing + c] as u32;
            }
        }
    }
}

/// Box blur of the given radius, in place
pub fn box_blur(image: &mut RgbaImage, radius: u32, pool: &BufferPool) -> Result<()> {
    if radius == 0 || image.width() == 0 || image.height() == 0 {
        return Ok(());
    }
    let mut scratch = pool.acquire_image(image.width(), image.height())?;
    box_pass(image, &mut scratch, radius as usize, true);
    box_pass(&scratch, image, radius as usize, false);
    pool.release_image(scratch);
    Ok(())
}

/// Gaussian approximation: three successive box blurs
pub fn gaussian_blur(image: &mut RgbaImage, radius: u32, pool: &BufferPool) -> Result<()> {
    let box_radius = (radius / 2).max(1);
    if radius == 0 {
        return Ok(());
    }
    for _ in 0..3 {
        box_blur(image, box_radius, pool)?;
    }
    Ok(())
}

/// Bilinear sample at pixel-space coordinates, clamped to the image
pub fn sample_bilinear(image: &RgbaImage, x: f32, y: f32) -> [u8; 4] {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(image.width() - 1), (y0 + 1).min(image.height() - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = clamp_u8(top * (1.0 - fy) + bottom * fy);
    }
    out
}

/// Even-odd point-in-polygon test
pub fn point_in_polygon(x: f32, y: f32, polygon: &[(f32, f32)]) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Contrast-limited adaptive histogram equalization of a luma plane
pub fn equalize_local_contrast(luma: &[u8], width: usize, height: usize, tiles: usize, clip: f32) -> Vec<u8> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let tile_w = width.div_ceil(tiles.clamp(1, width));
    let tile_h = height.div_ceil(tiles.clamp(1, height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut maps = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0u32; 256];
            let (x_end, y_end) = (((tx + 1) * tile_w).min(width), ((ty + 1) * tile_h).min(height));
            for y in ty * tile_h..y_end {
                for &v in &luma[y * width + tx * tile_w..y * width + x_end] {
                    hist[v as usize] += 1;
                }
            }
            let count = ((x_end - tx * tile_w) * (y_end - ty * tile_h)) as u32;

            // Clip the histogram and spread the excess evenly
            let limit = ((clip * count as f32 / 256.0).ceil() as u32).max(1);
            let mut excess = 0;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let share = excess / 256;
            let remainder = (excess % 256) as usize;
            let step = if remainder == 0 { 256 } else { (256 / remainder).max(1) };
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += share + u32::from(i % step == 0 && i / step < remainder);
            }

            let mut map = [0u8; 256];
            let mut cdf = 0u32;
            for (v, bin) in hist.iter().enumerate() {
                cdf += bin;
                map[v] = ((cdf as u64 * 255 + count as u64 / 2) / count.max(1) as u64).min(255) as u8;
            }
            maps.push(map);
        }
    }

    let mut out = Vec::with_capacity(luma.len());
    for y in 0..height {
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).max(0.0);
        let ty0 = (fy.floor() as usize).min(tiles_y - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);
        for x in 0..width {
            let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).max(0.0);
            let tx0 = (fx.floor() as usize).min(tiles_x - 1);
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let ax = (fx - tx0 as f32).clamp(0.0, 1.0);

            let v = luma[y * width + x] as usize;
            let top = maps[ty0 * tiles_x + tx0][v] as f32 * (1.0 - ax) + maps[ty0 * tiles_x + tx1][v] as f32 * ax;
            let bottom = maps[ty1 * tiles_x + tx0][v] as f32 * (1.0 - ax) + maps[ty1 * tiles_x + tx1][v] as f32 * ax;
            out.push(clamp_u8(top * (1.0 - ay) + bottom * ay));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn hsv_round_trip() {
        for (r, g, b) in [(1.0, 0.0, 0.0), (0.2, 0.6, 0.4), (0.5, 0.5, 0.5), (0.1, 0.2, 0.9)] {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let (r2, g2, b2) = hsv_to_rgb(h, s, v);
            assert!((r - r2).abs() < 1e-4 && (g - g2).abs() < 1e-4 && (b - b2).abs() < 1e-4);
        }
    }

    #[test]
    fn blur_keeps_flat_images_flat() {
        let pool = BufferPool::new(2);
        let mut image = RgbaImage::from_pixel(9, 5, Rgba([40, 80, 120, 255]));
        gaussian_blur(&mut image, 6, &pool).unwrap();
        assert!(image.pixels().all(|p| p.0 == [40, 80, 120, 255]));
    }

    #[test]
    fn blur_spreads_a_bright_pixel() {
        let pool = BufferPool::new(2);
        let mut image = RgbaImage::from_pixel(9, 9, Rgba([0, 0, 0, 255]));
        image.put_pixel(4, 4, Rgba([255, 255, 255, 255]));
        box_blur(&mut image, 1, &pool).unwrap();
        assert_eq!(image.get_pixel(4, 4)[0], 28);
        assert_eq!(image.get_pixel(3, 3)[0], 28);
        assert_eq!(image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn polygon_test_handles_concave_shapes() {
        let l_shape = [(0.0, 0.0), (4.0, 0.0), (4.0, 1.0), (1.0, 1.0), (1.0, 4.0), (0.0, 4.0)];
        assert!(point_in_polygon(0.5, 3.0, &l_shape));
        assert!(point_in_polygon(3.0, 0.5, &l_shape));
        assert!(!point_in_polygon(3.0, 3.0, &l_shape));
    }

    #[test]
    fn local_equalization_stretches_low_contrast_tiles() {
        let (w, h) = (32, 32);
        let luma: Vec<u8> = (0..w * h).map(|i| 100 + (i % 2) as u8 * 10).collect();
        let out = equalize_local_contrast(&luma, w, h, 4, 40.0);
        let spread = out.iter().max().unwrap() - out.iter().min().unwrap();
        assert!(spread > 10, "spread {spread}");
    }
}
