#[cfg(feature = "v4l")]
mod loopback;

#[cfg(feature = "v4l")]
pub use loopback::V4L2Output;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};

use crate::format;
use crate::frame::Frame;

/// Downstream destination for processed frames
pub trait FrameConsumer: Send {
    /// Take ownership of one emitted frame
    fn consume(&mut self, frame: Frame) -> Result<()>;
}

/// Forwards frames over a channel; the receiving end sees them in emission order
pub struct ChannelOutput {
    sender: Sender<Frame>,
}

impl ChannelOutput {
    pub fn new() -> (Self, Receiver<Frame>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl FrameConsumer for ChannelOutput {
    fn consume(&mut self, frame: Frame) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| anyhow!("frame receiver was dropped"))
    }
}

/// Writes every `every`-th frame as an upright PNG
pub struct ImageDirOutput {
    dir: PathBuf,
    every: u64,
    seen: u64,
    written: u64,
}

impl ImageDirOutput {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        tracing::info!("Writing frames to {}", dir.display());
        Ok(Self {
            dir,
            every: every.max(1),
            seen: 0,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameConsumer for ImageDirOutput {
    fn consume(&mut self, frame: Frame) -> Result<()> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }
        let buffer = format::decode(&frame).context("Failed to decode output frame")?;
        let path = self.dir.join(format!("frame_{:06}.png", self.seen));
        buffer
            .upright()
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.written += 1;
        tracing::debug!("wrote {}", path.display());
        Ok(())
    }
}
