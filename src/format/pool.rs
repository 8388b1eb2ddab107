use image::RgbaImage;
use parking_lot::Mutex;

use crate::error::{PipelineError, Result};

/// Recycles pixel buffers between frames so the hot path does not reallocate
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// A zeroed buffer of exactly `len` bytes
    pub fn acquire(&self, len: usize) -> Result<Vec<u8>> {
        let mut buffer = self.buffers.lock().pop().unwrap_or_default();
        buffer.clear();
        if buffer.capacity() < len {
            buffer
                .try_reserve_exact(len)
                .map_err(|_| PipelineError::Allocation { bytes: len })?;
        }
        buffer.resize(len, 0);
        Ok(buffer)
    }

    pub fn acquire_image(&self, width: u32, height: u32) -> Result<RgbaImage> {
        let len = super::canonical_len(width, height)?;
        let buffer = self.acquire(len)?;
        RgbaImage::from_raw(width, height, buffer).ok_or(PipelineError::Allocation { bytes: len })
    }

    /// Copy of `source` backed by a pooled buffer
    pub fn duplicate(&self, source: &RgbaImage) -> Result<RgbaImage> {
        let mut copy = self.acquire_image(source.width(), source.height())?;
        copy.copy_from_slice(source.as_raw());
        Ok(copy)
    }

    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.capacity() == 0 {
            return;
        }
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.capacity {
            buffers.push(buffer);
        }
    }

    pub fn release_image(&self, image: RgbaImage) {
        self.release(image.into_raw());
    }

    pub fn pooled(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn clear(&self) {
        self.buffers.lock().clear();
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(8)
    }
}
