use image::RgbaImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::kernels::{apply_lut, box_blur, build_lut, clamp_u8, equalize_local_contrast, lerp_u8, luma, saturate};
use super::{FilterStage, Knob, StageContext};
use crate::error::Result;
use crate::frame::Timestamp;

const KNOBS: &[Knob] = &[
    Knob::integral("effect", 0.0, 5.0, 0.0),
    Knob::new("intensity", 0.0, 1.0, 1.0),
];

const GRAIN_AMPLITUDE: i16 = 18;

/// Named looks, numbered the way the control surface sends them
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StyleEffect {
    #[default]
    Normal,
    Classic,
    Vintage,
    Cinema,
    PopArt,
    Hdr,
}

impl StyleEffect {
    pub const ALL: [StyleEffect; 6] = [
        StyleEffect::Normal,
        StyleEffect::Classic,
        StyleEffect::Vintage,
        StyleEffect::Cinema,
        StyleEffect::PopArt,
        StyleEffect::Hdr,
    ];

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> f32 {
        Self::ALL.iter().position(|e| *e == self).unwrap_or(0) as f32
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "normal" | "none" => Some(Self::Normal),
            "classic" | "sepia" => Some(Self::Classic),
            "vintage" => Some(Self::Vintage),
            "cinema" => Some(Self::Cinema),
            "popart" | "pop-art" | "pop_art" => Some(Self::PopArt),
            "hdr" => Some(Self::Hdr),
            _ => None,
        }
    }
}

/// Whole-frame stylization preset
#[derive(Clone, Debug, PartialEq)]
pub struct StylePreset {
    pub effect: StyleEffect,
    pub intensity: f32,
}

impl Default for StylePreset {
    fn default() -> Self {
        Self {
            effect: StyleEffect::Normal,
            intensity: 1.0,
        }
    }
}

impl StylePreset {
    fn sepia(&self, image: &mut RgbaImage, amount: f32) {
        for px in image.pixels_mut() {
            let l = luma(px[0], px[1], px[2]);
            let toned = [clamp_u8(1.351 * l), clamp_u8(1.203 * l), clamp_u8(0.937 * l)];
            for c in 0..3 {
                px[c] = lerp_u8(px[c], toned[c], amount);
            }
        }
    }

    /// Darken toward the corners
    fn vignette(&self, image: &mut RgbaImage) {
        let (width, height) = image.dimensions();
        let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
        let radius = 0.7 * width.min(height) as f32 / 2.0;
        if radius <= 0.0 {
            return;
        }
        for (x, y, px) in image.enumerate_pixels_mut() {
            let d = ((x as f32 + 0.5 - cx).powi(2) + (y as f32 + 0.5 - cy).powi(2)).sqrt() / radius;
            let falloff = (1.0 - d * d).max(0.0);
            let gain = 1.0 + (falloff - 1.0) * self.intensity;
            for c in 0..3 {
                px[c] = clamp_u8(px[c] as f32 * gain);
            }
        }
    }

    /// Film grain, reproducible per frame
    fn grain(&self, image: &mut RgbaImage, timestamp: Timestamp) {
        let mut rng = StdRng::seed_from_u64(timestamp.as_nanos());
        let amplitude = (GRAIN_AMPLITUDE as f32 * self.intensity) as i16;
        if amplitude == 0 {
            return;
        }
        for px in image.pixels_mut() {
            let noise = rng.random_range(-amplitude..=amplitude);
            for c in 0..3 {
                px[c] = (px[c] as i16 + noise).clamp(0, 255) as u8;
            }
        }
    }

    fn tone(&self, image: &mut RgbaImage, curve: impl Fn(f32) -> f32) {
        let amount = self.intensity;
        let lut = build_lut(|v| v + (curve(v) - v) * amount);
        apply_lut(image, &lut);
    }

    /// Local contrast on luma, colors scaled by the luma ratio
    fn hdr(&self, image: &mut RgbaImage) {
        let (width, height) = image.dimensions();
        let plane: Vec<u8> = image.pixels().map(|p| clamp_u8(luma(p[0], p[1], p[2]))).collect();
        let equalized = equalize_local_contrast(&plane, width as usize, height as usize, 8, 3.0);
        for ((px, before), after) in image.pixels_mut().zip(&plane).zip(&equalized) {
            let ratio = if *before == 0 {
                1.0
            } else {
                *after as f32 / *before as f32
            };
            for c in 0..3 {
                let boosted = if *before == 0 { *after } else { clamp_u8(px[c] as f32 * ratio) };
                px[c] = lerp_u8(px[c], boosted, self.intensity);
            }
        }
    }
}

impl FilterStage for StylePreset {
    fn name(&self) -> &'static str {
        "style"
    }

    fn knobs(&self) -> &'static [Knob] {
        KNOBS
    }

    fn configure(&mut self, key: &str, value: f32) {
        match key {
            "effect" => self.effect = StyleEffect::from_index(value as u32).unwrap_or_default(),
            "intensity" => self.intensity = value,
            _ => {}
        }
    }

    fn is_active(&self) -> bool {
        self.effect != StyleEffect::Normal && self.intensity > 0.0
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(());
        }
        match self.effect {
            StyleEffect::Normal => {}
            StyleEffect::Classic => {
                self.sepia(image, self.intensity);
                box_blur(image, 1, ctx.pool)?;
            }
            StyleEffect::Vintage => {
                self.tone(image, |v| (24.0 / 255.0) + v * 0.82);
                self.sepia(image, 0.5 * self.intensity);
                self.vignette(image);
                self.grain(image, ctx.timestamp);
            }
            StyleEffect::Cinema => {
                self.tone(image, |v| v * v * (3.0 - 2.0 * v));
                self.vignette(image);
            }
            StyleEffect::PopArt => {
                saturate(image, 1.0 + 0.8 * self.intensity);
                self.tone(image, |v| ((v - 0.5) * 1.1 + 0.5).clamp(0.0, 1.0));
            }
            StyleEffect::Hdr => self.hdr(image),
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FilterStage> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Landmarks;
    use crate::format::BufferPool;
    use image::Rgba;

    fn run(stage: &StylePreset, image: &mut RgbaImage, nanos: u64) {
        let pool = BufferPool::new(2);
        let landmarks = Landmarks::absent();
        let ctx = StageContext {
            landmarks: &landmarks,
            timestamp: Timestamp::from_nanos(nanos),
            pool: &pool,
        };
        stage.apply(image, &ctx).unwrap();
    }

    fn preset(effect: StyleEffect) -> StylePreset {
        StylePreset { effect, intensity: 1.0 }
    }

    #[test]
    fn effect_indices_are_stable() {
        for (i, effect) in StyleEffect::ALL.iter().enumerate() {
            assert_eq!(StyleEffect::from_index(i as u32), Some(*effect));
            assert_eq!(effect.index(), i as f32);
        }
        assert_eq!(StyleEffect::from_index(6), None);
        assert_eq!(StyleEffect::from_name("PopArt"), Some(StyleEffect::PopArt));
    }

    #[test]
    fn zero_intensity_is_inactive() {
        let stage = StylePreset {
            effect: StyleEffect::Cinema,
            intensity: 0.0,
        };
        assert!(!stage.is_active());
        assert!(preset(StyleEffect::Cinema).is_active());
        assert!(!preset(StyleEffect::Normal).is_active());
    }

    #[test]
    fn classic_turns_gray_warm() {
        let mut image = RgbaImage::from_pixel(8, 8, Rgba([120, 120, 120, 255]));
        run(&preset(StyleEffect::Classic), &mut image, 0);
        let px = image.get_pixel(4, 4);
        assert!(px[0] > px[1] && px[1] > px[2], "{:?}", px);
    }

    #[test]
    fn cinema_vignette_darkens_corners() {
        let mut image = RgbaImage::from_pixel(64, 48, Rgba([180, 180, 180, 255]));
        run(&preset(StyleEffect::Cinema), &mut image, 0);
        assert!(image.get_pixel(0, 0)[0] < image.get_pixel(32, 24)[0]);
    }

    #[test]
    fn vintage_grain_is_reproducible_per_timestamp() {
        let source = RgbaImage::from_pixel(16, 16, Rgba([128, 128, 128, 255]));
        let mut a = source.clone();
        let mut b = source.clone();
        let mut c = source;
        run(&preset(StyleEffect::Vintage), &mut a, 42);
        run(&preset(StyleEffect::Vintage), &mut b, 42);
        run(&preset(StyleEffect::Vintage), &mut c, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hdr_stretches_low_contrast_texture() {
        let mut image = RgbaImage::from_fn(64, 64, |x, y| {
            let v = 20 + (x % 4 + 4 * (y % 4)) as u8;
            Rgba([v, v, v, 255])
        });
        run(&preset(StyleEffect::Hdr), &mut image, 0);
        let values: Vec<u8> = image.pixels().map(|p| p[0]).collect();
        let spread = values.iter().max().unwrap() - values.iter().min().unwrap();
        assert!(spread > 40, "spread {spread}");
    }
}
