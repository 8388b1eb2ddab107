use super::FrameConsumer;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC};

use crate::format::{self, BufferPool, CanonicalBuffer};
use crate::frame::{Frame, PixelFormat, Rotation};

/// v4l2loopback device fed with upright YUYV frames
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    pool: BufferPool,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = v4l::Format::new(width, height, FourCC::new(b"YUYV"));
        let actual = Output::set_format(&device, &requested).context("Failed to set loopback output format")?;
        if (actual.width, actual.height) != (width, height) {
            tracing::warn!(
                "Loopback device accepted {}x{} instead of {}x{}",
                actual.width,
                actual.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            pool: BufferPool::new(4),
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameConsumer for V4L2Output {
    fn consume(&mut self, frame: Frame) -> Result<()> {
        let timestamp = frame.timestamp;
        let buffer = format::decode_with(&frame, &self.pool).context("Failed to decode output frame")?;

        // Loopback consumers know nothing about rotation metadata
        let mut upright = buffer.upright();
        if upright.dimensions() != (self.width, self.height) {
            upright = imageops::resize(&upright, self.width, self.height, FilterType::Triangle);
        }
        self.pool.release_image(buffer.into_image());

        let upright = CanonicalBuffer::new(upright, Rotation::Deg0, timestamp);
        let yuyv = format::encode_with(&upright, PixelFormat::Yuyv, &self.pool)?;
        for plane in &yuyv.planes {
            self.file
                .write_all(&plane.data)
                .context("Failed to write frame to v4l2loopback device")?;
        }
        for data in yuyv.into_buffers() {
            self.pool.release(data);
        }
        Ok(())
    }
}
