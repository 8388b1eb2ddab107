use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::format::rotate_image;
use crate::frame::Rotation;

static NEXT_BACKGROUND_ID: AtomicU64 = AtomicU64::new(1);

/// A static replacement background, stored upright
#[derive(Debug)]
pub struct BackgroundImage {
    id: u64,
    image: RgbaImage,
}

impl BackgroundImage {
    /// `orientation` is the clockwise rotation needed to show `image` upright
    pub fn new(image: RgbaImage, orientation: Rotation) -> Self {
        let image = match orientation {
            Rotation::Deg0 => image,
            other => rotate_image(&image, other),
        };
        Self {
            id: NEXT_BACKGROUND_ID.fetch_add(1, Ordering::Relaxed),
            image,
        }
    }

    pub fn upright(image: RgbaImage) -> Self {
        Self::new(image, Rotation::Deg0)
    }

    /// Unique per constructed background
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// How the background is scaled into the frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FitMode {
    /// Scale to fit inside, letterbox the rest
    Contain,
    /// Scale to fill, crop the overflow
    Cover,
}

impl FitMode {
    /// Landscape frames letterbox, portrait frames crop
    pub fn for_rotation(rotation: Rotation) -> Self {
        if rotation.is_landscape() {
            FitMode::Contain
        } else {
            FitMode::Cover
        }
    }
}

const LETTERBOX: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Rotate the background into the frame's buffer orientation and fit it to
/// `width` x `height`, preserving its aspect ratio
pub fn fit_background(background: &RgbaImage, width: u32, height: u32, mode: FitMode, rotation: Rotation) -> RgbaImage {
    let rotated;
    let source = if rotation == Rotation::Deg0 {
        background
    } else {
        rotated = rotate_image(background, rotation.inverse());
        &rotated
    };

    let (bw, bh) = source.dimensions();
    if bw == 0 || bh == 0 || width == 0 || height == 0 {
        return RgbaImage::from_pixel(width, height, LETTERBOX);
    }

    let scale_x = width as f64 / bw as f64;
    let scale_y = height as f64 / bh as f64;
    let scale = match mode {
        FitMode::Contain => scale_x.min(scale_y),
        FitMode::Cover => scale_x.max(scale_y),
    };
    let scaled_w = ((bw as f64 * scale).round() as u32).max(1);
    let scaled_h = ((bh as f64 * scale).round() as u32).max(1);

    let scaled = if (scaled_w, scaled_h) == (bw, bh) {
        source.clone()
    } else {
        imageops::resize(source, scaled_w, scaled_h, FilterType::Triangle)
    };

    match mode {
        FitMode::Contain => {
            let mut canvas = RgbaImage::from_pixel(width, height, LETTERBOX);
            let x = (width as i64 - scaled_w as i64) / 2;
            let y = (height as i64 - scaled_h as i64) / 2;
            imageops::replace(&mut canvas, &scaled, x, y);
            canvas
        }
        FitMode::Cover => {
            let x = scaled_w.saturating_sub(width) / 2;
            let y = scaled_h.saturating_sub(height) / 2;
            let mut cropped = imageops::crop_imm(&scaled, x, y, width, height).to_image();
            if cropped.dimensions() != (width, height) {
                // Rounding left the scaled image a pixel short on one axis
                let mut canvas = RgbaImage::from_pixel(width, height, LETTERBOX);
                imageops::replace(&mut canvas, &cropped, 0, 0);
                cropped = canvas;
            }
            cropped
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct FitKey {
    background: u64,
    width: u32,
    height: u32,
    rotation: Rotation,
    mode: FitMode,
}

/// Remembers the last fitted background so a steady stream fits it once
#[derive(Debug, Default)]
pub struct FittedCache {
    last: Mutex<Option<(FitKey, Arc<RgbaImage>)>>,
}

impl FittedCache {
    pub fn get(&self, background: &BackgroundImage, width: u32, height: u32, mode: FitMode, rotation: Rotation) -> Arc<RgbaImage> {
        let key = FitKey {
            background: background.id(),
            width,
            height,
            rotation,
            mode,
        };
        let mut last = self.last.lock();
        if let Some((cached, image)) = last.as_ref() {
            if *cached == key {
                return Arc::clone(image);
            }
        }
        let _span = tracing::debug_span!("fit_background", width, height).entered();
        let fitted = Arc::new(fit_background(background.image(), width, height, mode, rotation));
        *last = Some((key, Arc::clone(&fitted)));
        fitted
    }

    pub fn clear(&self) {
        *self.last.lock() = None;
    }
}
