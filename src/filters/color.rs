use image::RgbaImage;

use super::kernels::{apply_lut, build_lut, gaussian_blur, lerp_u8, saturate};
use super::{FilterStage, Knob, StageContext};
use crate::error::Result;

const KNOBS: &[Knob] = &[
    Knob::new("contrast", 0.0, 2.0, 1.0),
    Knob::new("brightness", 0.0, 2.0, 1.0),
    Knob::new("saturation", 0.0, 2.0, 1.0),
    Knob::new("blur_radius", 0.0, 25.0, 0.0),
    Knob::new("noise_reduction", 0.0, 1.0, 0.0),
];

/// Global color adjustments: tone curve, saturation, blur and denoise
#[derive(Clone, Debug, PartialEq)]
pub struct ColorAdjust {
    pub contrast: f32,
    pub brightness: f32,
    pub saturation: f32,
    pub blur_radius: f32,
    pub noise_reduction: f32,
}

impl Default for ColorAdjust {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            brightness: 1.0,
            saturation: 1.0,
            blur_radius: 0.0,
            noise_reduction: 0.0,
        }
    }
}

impl ColorAdjust {
    fn tone_active(&self) -> bool {
        self.contrast != 1.0 || self.brightness != 1.0
    }

    /// 3x3 mean, mixed back in by `noise_reduction`
    fn denoise(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        let source = ctx.pool.duplicate(image)?;
        let (width, height) = image.dimensions();
        for y in 0..height {
            for x in 0..width {
                let mut sum = [0u32; 3];
                let mut count = 0;
                for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                        let p = source.get_pixel(nx, ny);
                        sum[0] += p[0] as u32;
                        sum[1] += p[1] as u32;
                        sum[2] += p[2] as u32;
                        count += 1;
                    }
                }
                let px = image.get_pixel_mut(x, y);
                for c in 0..3 {
                    let mean = (sum[c] / count) as u8;
                    px[c] = lerp_u8(px[c], mean, self.noise_reduction);
                }
            }
        }
        ctx.pool.release_image(source);
        Ok(())
    }
}

impl FilterStage for ColorAdjust {
    fn name(&self) -> &'static str {
        "color"
    }

    fn knobs(&self) -> &'static [Knob] {
        KNOBS
    }

    fn configure(&mut self, key: &str, value: f32) {
        match key {
            "contrast" => self.contrast = value,
            "brightness" => self.brightness = value,
            "saturation" => self.saturation = value,
            "blur_radius" => self.blur_radius = value,
            "noise_reduction" => self.noise_reduction = value,
            _ => {}
        }
    }

    fn is_active(&self) -> bool {
        self.tone_active() || self.saturation != 1.0 || self.blur_radius >= 1.0 || self.noise_reduction > 0.0
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        if self.tone_active() {
            let (contrast, brightness) = (self.contrast, self.brightness);
            let lut = build_lut(|v| ((v * contrast).clamp(0.0, 1.0) * brightness).clamp(0.0, 1.0));
            apply_lut(image, &lut);
        }
        if self.saturation != 1.0 {
            saturate(image, self.saturation);
        }
        if self.blur_radius >= 1.0 {
            gaussian_blur(image, self.blur_radius as u32, ctx.pool)?;
        }
        if self.noise_reduction > 0.0 {
            self.denoise(image, ctx)?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FilterStage> {
        Box::new(self.clone())
    }
}
