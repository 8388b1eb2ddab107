use super::CaptureSource;
use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use std::time::Instant;

use crate::frame::{Frame, PixelFormat, Plane, Rotation, Timestamp};

/// Webcam delivering packed RGB24 frames stamped with a monotonic clock
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    rotation: Rotation,
    started: Instant,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32, rotation: Rotation) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = Camera::new(index, requested)
            .context("Failed to open camera")?;

        camera.open_stream()
            .context("Failed to open camera stream")?;

        let actual = camera.resolution();
        tracing::info!("Webcam streaming at {}x{}", actual.width(), actual.height());

        Ok(Self {
            camera,
            width: actual.width(),
            height: actual.height(),
            rotation,
            started: Instant::now(),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Frame> {
        let buffer = self
            .camera
            .frame()
            .context("Failed to capture frame")?;
        let timestamp = Timestamp::from_duration(self.started.elapsed());

        let decoded = buffer.decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;
        let (width, height) = decoded.dimensions();

        Ok(Frame::new(
            vec![Plane::new(decoded.into_raw(), width as usize * 3)],
            width,
            height,
            PixelFormat::Rgb24.fourcc(),
            self.rotation,
            timestamp,
        ))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
