//! BT.601 full-range YCbCr conversions

/// Convert RGB to YCbCr
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = -0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0;
    let cr = 0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0;

    (to_u8(y), to_u8(cb), to_u8(cr))
}

/// Convert YCbCr to RGB
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;

    let r = y + 1.402 * cr;
    let g = y - 0.344_136 * cb - 0.714_136 * cr;
    let b = y + 1.772 * cb;

    [to_u8(r), to_u8(g), to_u8(b)]
}

/// Chroma of an RGBA pixel group, averaged
pub fn average_chroma(pixels: &[[u8; 4]]) -> (u8, u8) {
    let (mut cb_sum, mut cr_sum) = (0u32, 0u32);
    for p in pixels {
        let (_, cb, cr) = rgb_to_ycbcr(p[0], p[1], p[2]);
        cb_sum += cb as u32;
        cr_sum += cr as u32;
    }
    let n = pixels.len().max(1) as u32;
    (
        ((cb_sum + n / 2) / n) as u8,
        ((cr_sum + n / 2) / n) as u8,
    )
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grey_has_neutral_chroma() {
        let (y, cb, cr) = rgb_to_ycbcr(128, 128, 128);
        assert_eq!((y, cb, cr), (128, 128, 128));
        assert_eq!(ycbcr_to_rgb(128, 128, 128), [128, 128, 128]);
    }

    #[test]
    fn primaries_survive_conversion_closely() {
        for rgb in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [200, 120, 40]] {
            let (y, cb, cr) = rgb_to_ycbcr(rgb[0], rgb[1], rgb[2]);
            let back = ycbcr_to_rgb(y, cb, cr);
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 2, "{rgb:?} -> {back:?}");
            }
        }
    }
}
