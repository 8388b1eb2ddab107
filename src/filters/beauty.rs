use image::RgbaImage;

use super::kernels::{apply_lut, build_lut, gaussian_blur, lerp_u8};
use super::{FilterStage, Knob, StageContext};
use crate::error::Result;

const KNOBS: &[Knob] = &[
    Knob::new("smoothing", 0.0, 1.0, 0.0),
    Knob::new("whiteness", 0.0, 1.0, 0.0),
];

/// Differences above this are treated as edges and left sharp
const EDGE_THRESHOLD: f32 = 40.0;

/// Skin smoothing and whitening
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BeautyFace {
    pub smoothing: f32,
    pub whiteness: f32,
}

impl BeautyFace {
    /// Edge-preserving smoothing: blend toward a blurred copy, less so where
    /// the copy differs a lot from the original
    fn smooth(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        let (width, height) = image.dimensions();
        let radius = (width.min(height) / 120).max(2);

        let mut blurred = ctx.pool.duplicate(image)?;
        gaussian_blur(&mut blurred, radius, ctx.pool)?;

        for (px, soft) in image.pixels_mut().zip(blurred.pixels()) {
            let diff = (0..3)
                .map(|c| (px[c] as f32 - soft[c] as f32).abs())
                .fold(0.0, f32::max);
            let weight = self.smoothing * (1.0 - diff / EDGE_THRESHOLD).clamp(0.0, 1.0);
            for c in 0..3 {
                px[c] = lerp_u8(px[c], soft[c], weight);
            }
        }
        ctx.pool.release_image(blurred);
        Ok(())
    }

    fn whiten(&self, image: &mut RgbaImage) {
        let amount = self.whiteness;
        let lut = build_lut(|v| {
            let lifted = (1.0 + 9.0 * v).ln() / 10f32.ln();
            v + (lifted - v) * amount
        });
        apply_lut(image, &lut);
    }
}

impl FilterStage for BeautyFace {
    fn name(&self) -> &'static str {
        "beauty"
    }

    fn knobs(&self) -> &'static [Knob] {
        KNOBS
    }

    fn configure(&mut self, key: &str, value: f32) {
        match key {
            "smoothing" => self.smoothing = value,
            "whiteness" => self.whiteness = value,
            _ => {}
        }
    }

    fn is_active(&self) -> bool {
        self.smoothing > 0.0 || self.whiteness > 0.0
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        if self.smoothing > 0.0 {
            self.smooth(image, ctx)?;
        }
        if self.whiteness > 0.0 {
            self.whiten(image);
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FilterStage> {
        Box::new(self.clone())
    }
}
