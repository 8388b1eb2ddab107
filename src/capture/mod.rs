#[cfg(feature = "v4l")]
mod v4l_capture;

#[cfg(feature = "v4l")]
pub use v4l_capture::WebcamCapture;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbaImage;

use crate::format::{self, CanonicalBuffer};
use crate::frame::{Frame, PixelFormat, Rotation, Timestamp};

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

/// Replays one still image as a stream of I420 frames on a synthetic clock
pub struct StillImageSource {
    frame: Frame,
    interval: Duration,
    next: Timestamp,
}

impl StillImageSource {
    pub fn open<P: AsRef<Path>>(path: P, fps: f64, rotation: Rotation) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to open still image {}", path.display()))?
            .to_rgba8();
        tracing::info!("Still image source {} ({}x{})", path.display(), image.width(), image.height());
        Ok(Self::from_image(image, fps, rotation))
    }

    pub fn from_image(image: RgbaImage, fps: f64, rotation: Rotation) -> Self {
        let buffer = CanonicalBuffer::new(image, rotation, Timestamp::default());
        Self {
            frame: format::encode(&buffer, PixelFormat::I420),
            interval: Duration::from_secs_f64(1.0 / fps.max(1.0)),
            next: Timestamp::default(),
        }
    }
}

impl CaptureSource for StillImageSource {
    fn capture_frame(&mut self) -> Result<Frame> {
        let mut frame = self.frame.clone();
        frame.timestamp = self.next;
        self.next = Timestamp::from_nanos(self.next.as_nanos() + self.interval.as_nanos() as u64);
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn still_source_advances_its_clock() {
        let mut source = StillImageSource::from_image(RgbaImage::from_pixel(6, 4, Rgba([9, 9, 9, 255])), 25.0, Rotation::Deg0);
        let first = source.capture_frame().unwrap();
        let second = source.capture_frame().unwrap();
        assert_eq!(source.resolution(), (6, 4));
        assert_eq!(first.format, PixelFormat::I420.fourcc());
        assert_eq!(second.timestamp.saturating_since(first.timestamp), Duration::from_millis(40));
    }
}
