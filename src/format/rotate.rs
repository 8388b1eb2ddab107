use image::error::{ImageError, ImageResult, ParameterError, ParameterErrorKind};
use image::{imageops, RgbaImage};

use crate::frame::Rotation;

/// Affine map over normalized `[0, 1]` image coordinates
///
/// `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Where a point lands once the image is rotated clockwise by `rotation`
    pub fn rotation(rotation: Rotation) -> Self {
        match rotation {
            Rotation::Deg0 => Self::IDENTITY,
            // (x, y) -> (1 - y, x)
            Rotation::Deg90 => Self {
                a: 0.0,
                b: -1.0,
                c: 1.0,
                d: 0.0,
                tx: 1.0,
                ty: 0.0,
            },
            Rotation::Deg180 => Self {
                a: -1.0,
                b: 0.0,
                c: 0.0,
                d: -1.0,
                tx: 1.0,
                ty: 1.0,
            },
            // (x, y) -> (y, 1 - x)
            Rotation::Deg270 => Self {
                a: 0.0,
                b: 1.0,
                c: -1.0,
                d: 0.0,
                tx: 0.0,
                ty: 1.0,
            },
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    /// `self` followed by `next`
    pub fn then(&self, next: &Transform) -> Transform {
        Transform {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }
}

/// Rotate an image clockwise
pub fn rotate_image(image: &RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Deg0 => image.clone(),
        Rotation::Deg90 => imageops::rotate90(image),
        Rotation::Deg180 => imageops::rotate180(image),
        Rotation::Deg270 => imageops::rotate270(image),
    }
}

/// Rotate an image clockwise into `out`, which must already have the rotated dimensions
pub fn rotate_image_into(image: &RgbaImage, rotation: Rotation, out: &mut RgbaImage) -> ImageResult<()> {
    match rotation {
        Rotation::Deg0 => {
            if out.dimensions() != image.dimensions() {
                return Err(ImageError::Parameter(ParameterError::from_kind(
                    ParameterErrorKind::DimensionMismatch,
                )));
            }
            out.copy_from_slice(image.as_raw());
            Ok(())
        }
        Rotation::Deg90 => imageops::rotate90_in(image, out),
        Rotation::Deg180 => imageops::rotate180_in(image, out),
        Rotation::Deg270 => imageops::rotate270_in(image, out),
    }
}

/// Rotate a row-major grid clockwise, returning the new width and height
pub fn rotate_grid<T: Copy>(data: &[T], width: usize, height: usize, rotation: Rotation) -> (Vec<T>, usize, usize) {
    let (out_w, out_h) = if rotation.is_landscape() {
        (width, height)
    } else {
        (height, width)
    };
    if rotation == Rotation::Deg0 {
        return (data.to_vec(), width, height);
    }

    let mut out = Vec::with_capacity(data.len());
    for oy in 0..out_h {
        for ox in 0..out_w {
            let (sx, sy) = match rotation {
                Rotation::Deg0 => (ox, oy),
                Rotation::Deg90 => (oy, height - 1 - ox),
                Rotation::Deg180 => (width - 1 - ox, height - 1 - oy),
                Rotation::Deg270 => (width - 1 - oy, ox),
            };
            out.push(data[sy * width + sx]);
        }
    }
    (out, out_w, out_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn approx(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn transform_tracks_rotated_pixels() {
        // 4x2 image with a marked pixel at (3, 0)
        let mut image = RgbaImage::new(4, 2);
        image.put_pixel(3, 0, Rgba([255, 0, 0, 255]));

        for rotation in [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let rotated = rotate_image(&image, rotation);
            let (nx, ny) = Transform::rotation(rotation).apply(3.5 / 4.0, 0.5 / 2.0);
            let px = (nx * rotated.width() as f32) as u32;
            let py = (ny * rotated.height() as f32) as u32;
            assert_eq!(rotated.get_pixel(px, py)[0], 255, "{rotation:?}");
        }
    }

    #[test]
    fn rotating_into_matches_allocating_rotation() {
        let image = RgbaImage::from_fn(5, 3, |x, y| Rgba([x as u8, y as u8, 9, 255]));
        for rotation in [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let expected = rotate_image(&image, rotation);
            let mut out = RgbaImage::new(expected.width(), expected.height());
            rotate_image_into(&image, rotation, &mut out).unwrap();
            assert_eq!(out, expected, "{rotation:?}");
        }

        let mut wrong = RgbaImage::new(5, 3);
        assert!(rotate_image_into(&image, Rotation::Deg90, &mut wrong).is_err());
        let mut wrong = RgbaImage::new(3, 5);
        assert!(rotate_image_into(&image, Rotation::Deg0, &mut wrong).is_err());
    }

    #[test]
    fn rotation_then_inverse_is_identity() {
        for rotation in [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let t = Transform::rotation(rotation).then(&Transform::rotation(rotation.inverse()));
            assert!(approx(t.apply(0.2, 0.7), (0.2, 0.7)));
        }
    }

    #[test]
    fn grid_rotation_matches_image_rotation() {
        let data: Vec<u8> = (0..6).collect();
        let image = RgbaImage::from_fn(3, 2, |x, y| {
            let v = data[(y * 3 + x) as usize];
            Rgba([v, 0, 0, 255])
        });
        for rotation in [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270] {
            let (grid, w, h) = rotate_grid(&data, 3, 2, rotation);
            let rotated = rotate_image(&image, rotation);
            assert_eq!((w as u32, h as u32), rotated.dimensions());
            for (i, v) in grid.iter().enumerate() {
                let (x, y) = ((i % w) as u32, (i / w) as u32);
                assert_eq!(rotated.get_pixel(x, y)[0], *v);
            }
        }
    }
}
