//! Foreground/background compositing from a segmentation mask

mod fit;

pub use fit::{fit_background, BackgroundImage, FitMode, FittedCache};

use image::RgbaImage;
use rayon::prelude::*;

use crate::detection::Mask;
use crate::format::CanonicalBuffer;

/// How mask probabilities turn into pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendPolicy {
    /// Foreground where probability >= threshold, background elsewhere
    #[default]
    HardThreshold,
    /// Mix by probability; the threshold is ignored
    SoftAlpha,
}

/// Per-call compositing inputs besides the pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeSettings {
    pub threshold: f32,
    pub policy: BlendPolicy,
    /// `None` picks by frame orientation
    pub fit: Option<FitMode>,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            policy: BlendPolicy::HardThreshold,
            fit: None,
        }
    }
}

/// Blends a foreground over an already fitted background of the same size
pub trait Compositor: Send + Sync {
    fn name(&self) -> &'static str;

    fn blend(&self, foreground: &mut RgbaImage, mask: &Mask, background: &RgbaImage, threshold: f32, policy: BlendPolicy);
}

/// Nearest mask sample for every column, computed once per call
fn column_map(frame_width: u32, mask_width: u32) -> Vec<u32> {
    (0..frame_width)
        .map(|x| ((x as u64 * mask_width as u64) / frame_width as u64) as u32)
        .collect()
}

/// Everything a band of rows needs to blend itself
struct RowBlend<'a> {
    width: u32,
    height: u32,
    columns: Vec<u32>,
    mask: &'a Mask,
    background: &'a RgbaImage,
    threshold: f32,
    policy: BlendPolicy,
}

impl<'a> RowBlend<'a> {
    fn new(frame: (u32, u32), mask: &'a Mask, background: &'a RgbaImage, threshold: f32, policy: BlendPolicy) -> Self {
        Self {
            width: frame.0,
            height: frame.1,
            columns: column_map(frame.0, mask.width()),
            mask,
            background,
            threshold,
            policy,
        }
    }

    fn rows(&self, rows: &mut [u8], first_row: u32) {
        let stride = self.width as usize * 4;
        let bg = self.background.as_raw();

        for (i, row) in rows.chunks_exact_mut(stride).enumerate() {
            let y = first_row + i as u32;
            let my = ((y as u64 * self.mask.height() as u64) / self.height as u64) as u32;
            let bg_row = &bg[y as usize * stride..(y as usize + 1) * stride];

            for (x, (px, back)) in row.chunks_exact_mut(4).zip(bg_row.chunks_exact(4)).enumerate() {
                let probability = self.mask.get(self.columns[x], my);
                match self.policy {
                    BlendPolicy::HardThreshold => {
                        if probability < self.threshold {
                            px.copy_from_slice(back);
                        }
                    }
                    BlendPolicy::SoftAlpha => {
                        for c in 0..4 {
                            let mixed = px[c] as f32 * probability + back[c] as f32 * (1.0 - probability);
                            px[c] = mixed.round().clamp(0.0, 255.0) as u8;
                        }
                    }
                }
            }
        }
    }
}

/// Single-threaded blend
#[derive(Debug, Default)]
pub struct CpuCompositor;

impl Compositor for CpuCompositor {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn blend(&self, foreground: &mut RgbaImage, mask: &Mask, background: &RgbaImage, threshold: f32, policy: BlendPolicy) {
        let job = RowBlend::new(foreground.dimensions(), mask, background, threshold, policy);
        job.rows(foreground, 0);
    }
}

/// Splits the frame into horizontal bands blended on the rayon pool
#[derive(Debug)]
pub struct ParallelCompositor {
    bands: usize,
}

impl ParallelCompositor {
    /// `bands` is how many row bands each frame is cut into
    pub fn new(bands: usize) -> Self {
        Self { bands: bands.max(1) }
    }
}

impl Compositor for ParallelCompositor {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn blend(&self, foreground: &mut RgbaImage, mask: &Mask, background: &RgbaImage, threshold: f32, policy: BlendPolicy) {
        let (width, height) = foreground.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let job = RowBlend::new((width, height), mask, background, threshold, policy);
        let band_rows = (height as usize).div_ceil(self.bands);
        let band_len = band_rows * width as usize * 4;
        let pixels: &mut [u8] = foreground;

        pixels
            .par_chunks_mut(band_len)
            .enumerate()
            .for_each(|(band, rows)| job.rows(rows, (band * band_rows) as u32));
    }
}

/// Which compositor variant to run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositorKind {
    Cpu,
    Parallel { threads: usize },
}

impl CompositorKind {
    /// Pick by the size of the global rayon pool
    pub fn detect() -> Self {
        let threads = rayon::current_num_threads();
        if threads > 1 {
            CompositorKind::Parallel { threads: threads.min(8) }
        } else {
            CompositorKind::Cpu
        }
    }

    pub fn build(self) -> Box<dyn Compositor> {
        match self {
            CompositorKind::Cpu => Box::new(CpuCompositor),
            CompositorKind::Parallel { threads } => Box::new(ParallelCompositor::new(threads)),
        }
    }
}

/// Mask + background → composited frame, with the fitted background cached
pub struct SegmentationCompositor {
    backend: Box<dyn Compositor>,
    fitted: FittedCache,
}

impl SegmentationCompositor {
    pub fn new(kind: CompositorKind) -> Self {
        let backend = kind.build();
        tracing::info!("Using {} compositor", backend.name());
        Self {
            backend,
            fitted: FittedCache::default(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Output keeps the frame's dimensions, timestamp and rotation.
    /// `mask` must already be in the buffer's orientation.
    pub fn compose(&self, mut frame: CanonicalBuffer, mask: &Mask, background: &BackgroundImage, settings: &CompositeSettings) -> CanonicalBuffer {
        let _span = tracing::debug_span!("compose").entered();

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 || mask.width() == 0 || mask.height() == 0 {
            return frame;
        }
        let rotation = frame.rotation();
        let mode = settings.fit.unwrap_or_else(|| FitMode::for_rotation(rotation));
        let fitted = self.fitted.get(background, width, height, mode, rotation);

        self.backend
            .blend(frame.image_mut(), mask, &fitted, settings.threshold, settings.policy);
        frame
    }

    pub fn clear_cache(&self) {
        self.fitted.clear();
    }
}

impl Default for SegmentationCompositor {
    fn default() -> Self {
        Self::new(CompositorKind::detect())
    }
}
