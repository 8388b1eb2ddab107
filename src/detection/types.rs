use std::sync::Arc;

use anyhow::Result;
use image::RgbaImage;

use crate::format::{rotate_grid, Transform};
use crate::frame::{Rotation, Timestamp};

/// A 2D reference point in normalized `[0, 1]` image coordinates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, other: Point2, t: f32) -> Point2 {
        Point2::new(self.x + (other.x - self.x) * t, self.y + (other.y - self.y) * t)
    }

    /// Scale normalized coordinates to pixels
    pub fn to_pixels(self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }
}

/// Per-pixel foreground probability, 0.0 = background, 1.0 = person
///
/// Usually smaller than the frame it was computed from.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Mask {
    /// Returns `None` when `data` does not hold `width * height` values or
    /// any value is NaN or infinite. Finite values are clamped to [0, 1].
    pub fn new(width: u32, height: u32, mut data: Vec<f32>) -> Option<Self> {
        if data.len() != width as usize * height as usize || !data.iter().all(|p| p.is_finite()) {
            return None;
        }
        for p in &mut data {
            *p = p.clamp(0.0, 1.0);
        }
        Some(Self { width, height, data })
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let p = f(x, y);
                // NaN counts as background
                data.push(if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) });
            }
        }
        Self { width, height, data }
    }

    pub fn uniform(width: u32, height: u32, probability: f32) -> Self {
        Self::from_fn(width, height, |_, _| probability)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize]
    }

    pub fn rotated(&self, rotation: Rotation) -> Mask {
        let (data, width, height) =
            rotate_grid(&self.data, self.width as usize, self.height as usize, rotation);
        Mask {
            width: width as u32,
            height: height as u32,
            data,
        }
    }
}

/// Model output that can be cached and mapped back into buffer space
pub trait DetectionOutput: Send + Sync + 'static {
    fn is_empty(&self) -> bool;

    /// Map a result computed on the upright image back onto a buffer
    /// that the consumer rotates by `rotation`
    fn into_buffer_space(self, rotation: Rotation) -> Self;
}

impl DetectionOutput for Vec<Point2> {
    fn is_empty(&self) -> bool {
        <[Point2]>::is_empty(self)
    }

    fn into_buffer_space(mut self, rotation: Rotation) -> Self {
        let back = Transform::rotation(rotation.inverse());
        for point in &mut self {
            let (x, y) = back.apply(point.x, point.y);
            *point = Point2::new(x, y);
        }
        self
    }
}

impl DetectionOutput for Mask {
    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn into_buffer_space(self, rotation: Rotation) -> Self {
        if rotation == Rotation::Deg0 {
            return self;
        }
        self.rotated(rotation.inverse())
    }
}

/// External face landmark detector
///
/// Points are returned in normalized coordinates of the image passed in.
pub trait LandmarkDetector: Send {
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Point2>>;

    /// Reset internal state (tracking history, etc.)
    fn reset_state(&mut self) {}
}

/// External person segmentation model
pub trait Segmenter: Send {
    /// Foreground probability for the image, at whatever resolution the model produces
    fn segment(&mut self, image: &RgbaImage) -> Result<Mask>;

    /// Forget temporal state, e.g. when the camera changes
    fn reset_state(&mut self) {}
}

/// Where a detection result came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Fresh result for this frame
    Detected,
    /// Last good result, served because the model failed, timed out or was busy
    Cached,
    /// No result has ever been produced
    Absent,
}

/// A model result tagged with its provenance and the frame that produced it
#[derive(Debug)]
pub struct Detection<T> {
    value: Option<Arc<T>>,
    provenance: Provenance,
    timestamp: Option<Timestamp>,
}

impl<T> Clone for Detection<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            provenance: self.provenance,
            timestamp: self.timestamp,
        }
    }
}

impl<T> Detection<T> {
    pub fn absent() -> Self {
        Self {
            value: None,
            provenance: Provenance::Absent,
            timestamp: None,
        }
    }

    pub(crate) fn detected(value: Arc<T>, timestamp: Timestamp) -> Self {
        Self {
            value: Some(value),
            provenance: Provenance::Detected,
            timestamp: Some(timestamp),
        }
    }

    pub(crate) fn cached(value: Arc<T>, timestamp: Timestamp) -> Self {
        Self {
            value: Some(value),
            provenance: Provenance::Cached,
            timestamp: Some(timestamp),
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Timestamp of the frame the value was computed from
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn is_absent(&self) -> bool {
        self.provenance == Provenance::Absent
    }
}

impl<T: DetectionOutput> Detection<T> {
    /// Wrap a fresh model result; empty results count as absent
    pub fn from_model(value: T, timestamp: Timestamp) -> Self {
        if value.is_empty() {
            Self::absent()
        } else {
            Self::detected(Arc::new(value), timestamp)
        }
    }
}

/// Face landmarks for a frame
pub type Landmarks = Detection<Vec<Point2>>;

impl Landmarks {
    pub fn points(&self) -> &[Point2] {
        self.value().map(Vec::as_slice).unwrap_or(&[])
    }
}
