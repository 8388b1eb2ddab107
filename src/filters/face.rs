//! Stages driven by 106-point face landmarks

use image::RgbaImage;

use super::kernels::{lerp_u8, point_in_polygon, sample_bilinear};
use super::{FilterStage, Knob, StageContext};
use crate::detection::Point2;
use crate::error::Result;

/// Indices into the 106-point landmark layout
pub mod layout {
    use std::ops::Range;

    pub const POINT_COUNT: usize = 106;

    /// Jaw line, left ear to right ear
    pub const CONTOUR: Range<usize> = 0..33;
    pub const LEFT_CHEEK: usize = 6;
    pub const RIGHT_CHEEK: usize = 26;
    pub const LEFT_JAW: usize = 9;
    pub const RIGHT_JAW: usize = 23;

    pub const NOSE_TIP: usize = 46;

    pub const LIPS_OUTER: Range<usize> = 84..96;
    pub const LIPS_INNER: Range<usize> = 96..104;

    pub const LEFT_PUPIL: usize = 104;
    pub const RIGHT_PUPIL: usize = 105;
}

/// Pixel-space view of a full landmark set
struct Face {
    points: Vec<(f32, f32)>,
}

impl Face {
    /// `None` unless a complete 106-point set is present
    fn locate(ctx: &StageContext<'_>, width: u32, height: u32) -> Option<Self> {
        let points = ctx.landmarks.points();
        if points.len() < layout::POINT_COUNT {
            return None;
        }
        Some(Self {
            points: points.iter().map(|p| p.to_pixels(width, height)).collect(),
        })
    }

    fn at(&self, index: usize) -> (f32, f32) {
        self.points[index]
    }

    fn polygon(&self, range: std::ops::Range<usize>) -> &[(f32, f32)] {
        &self.points[range]
    }

    fn width(&self) -> f32 {
        distance(self.at(layout::CONTOUR.start), self.at(layout::CONTOUR.end - 1))
    }

    fn nose(&self) -> (f32, f32) {
        self.at(layout::NOSE_TIP)
    }
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn lerp_point(a: (f32, f32), b: (f32, f32), t: f32) -> (f32, f32) {
    let p = Point2::new(a.0, a.1).lerp(Point2::new(b.0, b.1), t);
    (p.x, p.y)
}

/// Integer pixel bounds of a point set, grown by `margin` and clipped to the image
fn bounds(points: impl IntoIterator<Item = (f32, f32)>, margin: f32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for (x, y) in points {
        x0 = x0.min(x - margin);
        y0 = y0.min(y - margin);
        x1 = x1.max(x + margin);
        y1 = y1.max(y + margin);
    }
    if x1 < 0.0 || y1 < 0.0 || x0 >= width as f32 || y0 >= height as f32 || x0 > x1 {
        return None;
    }
    Some((
        x0.max(0.0) as u32,
        y0.max(0.0) as u32,
        (x1.ceil() as u32).min(width - 1),
        (y1.ceil() as u32).min(height - 1),
    ))
}

const LIPSTICK_KNOBS: &[Knob] = &[Knob::new("blend_level", 0.0, 1.0, 0.0)];

const LIPSTICK_COLOR: [u8; 3] = [196, 38, 64];

/// Tints the lips, leaving the open mouth untouched
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lipstick {
    pub blend_level: f32,
}

impl FilterStage for Lipstick {
    fn name(&self) -> &'static str {
        "lipstick"
    }

    fn knobs(&self) -> &'static [Knob] {
        LIPSTICK_KNOBS
    }

    fn configure(&mut self, key: &str, value: f32) {
        if key == "blend_level" {
            self.blend_level = value;
        }
    }

    fn is_active(&self) -> bool {
        self.blend_level > 0.0
    }

    fn needs_landmarks(&self) -> bool {
        true
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        let (width, height) = image.dimensions();
        let Some(face) = Face::locate(ctx, width, height) else {
            return Ok(());
        };
        let outer = face.polygon(layout::LIPS_OUTER);
        let inner = face.polygon(layout::LIPS_INNER);
        let Some((x0, y0, x1, y1)) = bounds(outer.iter().copied(), 1.0, width, height) else {
            return Ok(());
        };

        for y in y0..=y1 {
            for x in x0..=x1 {
                let (cx, cy) = (x as f32 + 0.5, y as f32 + 0.5);
                if !point_in_polygon(cx, cy, outer) || point_in_polygon(cx, cy, inner) {
                    continue;
                }
                let px = image.get_pixel_mut(x, y);
                for c in 0..3 {
                    let tinted = px[c] as f32 * 0.35 + LIPSTICK_COLOR[c] as f32 * 0.65;
                    px[c] = lerp_u8(px[c], tinted.round() as u8, self.blend_level);
                }
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FilterStage> {
        Box::new(self.clone())
    }
}

const BLUSHER_KNOBS: &[Knob] = &[Knob::new("blend_level", 0.0, 1.0, 0.0)];

const BLUSHER_COLOR: [u8; 3] = [232, 112, 124];

/// Soft radial tint on both cheeks
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blusher {
    pub blend_level: f32,
}

impl FilterStage for Blusher {
    fn name(&self) -> &'static str {
        "blusher"
    }

    fn knobs(&self) -> &'static [Knob] {
        BLUSHER_KNOBS
    }

    fn configure(&mut self, key: &str, value: f32) {
        if key == "blend_level" {
            self.blend_level = value;
        }
    }

    fn is_active(&self) -> bool {
        self.blend_level > 0.0
    }

    fn needs_landmarks(&self) -> bool {
        true
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        let (width, height) = image.dimensions();
        let Some(face) = Face::locate(ctx, width, height) else {
            return Ok(());
        };
        let radius = 0.12 * face.width();
        if radius < 1.0 {
            return Ok(());
        }

        for cheek in [layout::LEFT_CHEEK, layout::RIGHT_CHEEK] {
            let center = lerp_point(face.at(cheek), face.nose(), 0.4);
            let Some((x0, y0, x1, y1)) = bounds([center], radius, width, height) else {
                continue;
            };
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let d = distance((x as f32 + 0.5, y as f32 + 0.5), center);
                    if d >= radius {
                        continue;
                    }
                    let weight = self.blend_level * 0.45 * (1.0 - (d / radius).powi(2));
                    let px = image.get_pixel_mut(x, y);
                    for c in 0..3 {
                        px[c] = lerp_u8(px[c], BLUSHER_COLOR[c], weight);
                    }
                }
            }
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FilterStage> {
        Box::new(self.clone())
    }
}

const RESHAPE_KNOBS: &[Knob] = &[
    Knob::new("thin_face", 0.0, 1.0, 0.0),
    Knob::new("big_eye", 0.0, 1.0, 0.0),
];

/// Geometric face warp: pulls the jaw toward the nose and magnifies the eyes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceReshape {
    pub thin_face: f32,
    pub big_eye: f32,
}

/// Circle of influence around a control point
struct Warp {
    center: (f32, f32),
    radius: f32,
    /// Translation for jaw points, unused for eyes
    shift: (f32, f32),
}

impl FaceReshape {
    /// Source position for an output pixel: eye magnification first,
    /// then the local translation warps
    fn source(&self, mut p: (f32, f32), eyes: &[Warp], jaw: &[Warp]) -> (f32, f32) {
        for eye in eyes {
            let d = distance(p, eye.center);
            if d < eye.radius {
                let scale = 1.0 - 0.25 * self.big_eye * (1.0 - (d / eye.radius).powi(2));
                p = (
                    eye.center.0 + (p.0 - eye.center.0) * scale,
                    eye.center.1 + (p.1 - eye.center.1) * scale,
                );
            }
        }
        for warp in jaw {
            let d2 = (p.0 - warp.center.0).powi(2) + (p.1 - warp.center.1).powi(2);
            let r2 = warp.radius * warp.radius;
            if d2 >= r2 {
                continue;
            }
            let m2 = warp.shift.0.powi(2) + warp.shift.1.powi(2);
            let factor = ((r2 - d2) / (r2 - d2 + m2)).powi(2);
            p = (p.0 - factor * warp.shift.0, p.1 - factor * warp.shift.1);
        }
        p
    }
}

impl FilterStage for FaceReshape {
    fn name(&self) -> &'static str {
        "reshape"
    }

    fn knobs(&self) -> &'static [Knob] {
        RESHAPE_KNOBS
    }

    fn configure(&mut self, key: &str, value: f32) {
        match key {
            "thin_face" => self.thin_face = value,
            "big_eye" => self.big_eye = value,
            _ => {}
        }
    }

    fn is_active(&self) -> bool {
        self.thin_face > 0.0 || self.big_eye > 0.0
    }

    fn needs_landmarks(&self) -> bool {
        true
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()> {
        let (width, height) = image.dimensions();
        let Some(face) = Face::locate(ctx, width, height) else {
            return Ok(());
        };
        let face_width = face.width();
        if face_width < 2.0 {
            return Ok(());
        }

        let mut eyes = Vec::new();
        if self.big_eye > 0.0 {
            let left = face.at(layout::LEFT_PUPIL);
            let right = face.at(layout::RIGHT_PUPIL);
            let radius = 0.4 * distance(left, right);
            if radius >= 1.0 {
                eyes.push(Warp { center: left, radius, shift: (0.0, 0.0) });
                eyes.push(Warp { center: right, radius, shift: (0.0, 0.0) });
            }
        }

        let mut jaw = Vec::new();
        if self.thin_face > 0.0 {
            let nose = face.nose();
            for index in [layout::LEFT_CHEEK, layout::LEFT_JAW, layout::RIGHT_JAW, layout::RIGHT_CHEEK] {
                let center = face.at(index);
                let strength = 0.15 * self.thin_face;
                jaw.push(Warp {
                    center,
                    radius: 0.25 * face_width,
                    shift: ((nose.0 - center.0) * strength, (nose.1 - center.1) * strength),
                });
            }
        }

        let touched = eyes.iter().chain(&jaw).flat_map(|w| {
            [
                (w.center.0 - w.radius, w.center.1 - w.radius),
                (w.center.0 + w.radius, w.center.1 + w.radius),
            ]
        });
        let Some((x0, y0, x1, y1)) = bounds(touched, 1.0, width, height) else {
            return Ok(());
        };

        let source = ctx.pool.duplicate(image)?;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (sx, sy) = self.source((x as f32, y as f32), &eyes, &jaw);
                if (sx - x as f32).abs() < 1e-3 && (sy - y as f32).abs() < 1e-3 {
                    continue;
                }
                image.put_pixel(x, y, image::Rgba(sample_bilinear(&source, sx, sy)));
            }
        }
        ctx.pool.release_image(source);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn FilterStage> {
        Box::new(self.clone())
    }
}
