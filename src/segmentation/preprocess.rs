use anyhow::{bail, Result};
use image::{imageops, RgbaImage};
use ndarray::Array4;

use crate::detection::Mask;

/// Resizes frames to the model's input and turns its alpha output into a `Mask`
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// RGBA image to a normalized `[1, 3, H, W]` tensor; alpha is dropped
    pub fn preprocess(&self, image: &RgbaImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() == (self.target_width, self.target_height) {
            image
        } else {
            resized = imageops::resize(image, self.target_width, self.target_height, imageops::FilterType::Triangle);
            &resized
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel[c] as f32 / 255.0;
            }
        }
        tensor
    }

    /// Model alpha output, shaped `[1, 1, H, W]`, as a mask at model resolution.
    /// The compositor maps it onto the frame, so no resize happens here.
    pub fn matte_to_mask(shape: &[i64], data: &[f32]) -> Result<Mask> {
        let [_, _, height, width] = shape else {
            bail!("expected a 4-d alpha output, got shape {:?}", shape);
        };
        let (width, height) = (*width as u32, *height as u32);
        let values = data.iter().map(|v| v.clamp(0.0, 1.0)).collect();
        match Mask::new(width, height, values) {
            Some(mask) => Ok(mask),
            None => bail!("alpha output holds {} values, expected {}x{}", data.len(), width, height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn tensor_is_channel_major_and_normalized() {
        let image = RgbaImage::from_pixel(4, 2, Rgba([255, 0, 51, 7]));
        let tensor = Preprocessor::new(4, 2).preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert_eq!(tensor[[0, 0, 1, 3]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn matte_shape_is_checked() {
        let mask = Preprocessor::matte_to_mask(&[1, 1, 2, 3], &[0.0, 0.5, 1.5, 1.0, -0.2, 0.25]).unwrap();
        assert_eq!((mask.width(), mask.height()), (3, 2));
        assert_eq!(mask.get(2, 0), 1.0);
        assert_eq!(mask.get(1, 1), 0.0);

        assert!(Preprocessor::matte_to_mask(&[1, 2, 3], &[0.0; 6]).is_err());
        assert!(Preprocessor::matte_to_mask(&[1, 1, 2, 2], &[0.0; 3]).is_err());
    }
}
