//! The orchestrator: admission, hand-off to the processing worker, and the
//! runtime control surface

mod config;
mod state;

pub use config::PipelineConfig;
pub use state::{BackgroundSnapshot, PipelineState};
pub use crate::governor::MAX_FRAME_RATE;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};

use crate::compositor::{BackgroundImage, BlendPolicy, CompositorKind, FitMode, SegmentationCompositor};
use crate::detection::{DetectionCache, LandmarkCache, LandmarkDetector, Landmarks, MaskCache, Provenance, Segmenter};
use crate::error::{ConfigError, PipelineError, Result};
use crate::filters::FilterChain;
use crate::flight::{FlightGuard, SingleFlight};
use crate::format::{self, BufferPool};
use crate::frame::{Frame, PixelFormat};
use crate::governor::{Admission, FrameGovernor};
use crate::output::FrameConsumer;
use crate::sink::{Delivery, OutputSink};
use crate::stats::{PipelineStats, StatsSnapshot};

/// Why a submitted frame was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TooSoon,
    Busy,
}

/// What `submit` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Nothing to do, so the frame went straight to the sink
    Bypassed(Delivery),
    /// Handed to the processing worker
    Admitted,
    Dropped(DropReason),
}

struct Job {
    frame: Frame,
    _flight: FlightGuard,
}

/// Everything the worker and the control surface share
struct Shared {
    governor: FrameGovernor,
    state: PipelineState,
    landmarks: Option<LandmarkCache>,
    masks: Option<MaskCache>,
    compositor: SegmentationCompositor,
    sink: OutputSink,
    pool: BufferPool,
    stats: PipelineStats,
    output_format: Option<PixelFormat>,
    passthrough_bypass: bool,
    stats_interval: u64,
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    consumer: Box<dyn FrameConsumer>,
    detector: Option<Box<dyn LandmarkDetector>>,
    segmenter: Option<Box<dyn Segmenter>>,
    filters: FilterChain,
    background: Option<BackgroundImage>,
}

impl PipelineBuilder {
    pub fn new(consumer: Box<dyn FrameConsumer>) -> Self {
        Self {
            config: PipelineConfig::default(),
            consumer,
            detector: None,
            segmenter: None,
            filters: FilterChain::standard(),
            background: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn landmark_detector(mut self, detector: Box<dyn LandmarkDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn segmenter(mut self, segmenter: Box<dyn Segmenter>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn background(mut self, background: BackgroundImage) -> Self {
        self.background = Some(background);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        // Landmarks and segmentation share one slot: at most one inference in flight
        let inference = SingleFlight::new();
        let landmarks = self
            .detector
            .map(|d| DetectionCache::landmarks(d, config.detection_timeout, inference.clone()))
            .transpose()?;
        let masks = self
            .segmenter
            .map(|s| DetectionCache::masks(s, config.detection_timeout, inference.clone()))
            .transpose()?;

        let state = PipelineState::new(config.confidence_threshold, config.blend_policy, config.fit_mode, self.filters)?;
        if let Some(background) = self.background {
            state.set_background(Some(background));
        }

        let shared = Arc::new(Shared {
            governor: FrameGovernor::new(config.frame_rate)?,
            state,
            landmarks,
            masks,
            compositor: SegmentationCompositor::new(config.compositor.unwrap_or_else(CompositorKind::detect)),
            sink: OutputSink::new(self.consumer),
            pool: BufferPool::new(config.pool_capacity),
            stats: PipelineStats::default(),
            output_format: config.output_format,
            passthrough_bypass: config.passthrough_bypass,
            stats_interval: config.stats_interval,
        });

        if shared.masks.is_none() {
            tracing::info!("No segmenter configured, backgrounds will not be applied");
        }

        // Single slot: the governor never lets a second job exist
        let (jobs, receiver) = crossbeam_channel::bounded::<Job>(1);
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("callfx-pipeline".to_string())
            .spawn(move || {
                tracing::debug!("pipeline worker started");
                while let Ok(job) = receiver.recv() {
                    worker_shared.run(job);
                }
                tracing::debug!("pipeline worker stopped");
            })
            .map_err(|source| PipelineError::Spawn {
                worker: "pipeline",
                source,
            })?;

        tracing::info!(
            "Pipeline ready: {} fps, threshold {}, {} compositor",
            config.frame_rate,
            config.confidence_threshold,
            shared.compositor.backend_name()
        );

        Ok(Pipeline {
            shared,
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }
}

impl Shared {
    fn run(&self, job: Job) {
        let Job { frame, _flight } = job;
        let timestamp = frame.timestamp;
        let started = Instant::now();

        match catch_unwind(AssertUnwindSafe(|| self.process(frame))) {
            Ok(Ok(delivery)) => self.record(delivery),
            Ok(Err(PipelineError::Format(e))) => {
                self.stats.format_error();
                tracing::warn!("Dropping frame {}: {}", timestamp, e);
            }
            Ok(Err(e @ PipelineError::Allocation { .. })) => {
                self.stats.resource_error();
                tracing::warn!("Dropping frame {}: {}", timestamp, e);
            }
            Ok(Err(e)) => {
                tracing::warn!("Dropping frame {}: {}", timestamp, e);
            }
            Err(_) => {
                tracing::warn!("Processing panicked on frame {}", timestamp);
            }
        }
        self.stats.processed(started.elapsed());
        // _flight drops here, reopening admission
    }

    fn process(&self, frame: Frame) -> Result<Delivery> {
        let chain = self.state.filters();
        let background = self.state.background();
        let settings = self.state.composite_settings();

        let mut buffer = format::decode_with(&frame, &self.pool)?;
        let target = match self.output_format {
            Some(target) => target,
            None => format::validate(&frame)?,
        };
        for data in frame.into_buffers() {
            self.pool.release(data);
        }

        let landmarks = match &self.landmarks {
            Some(cache) if chain.needs_landmarks() => {
                let landmarks = cache.detect(&buffer);
                if landmarks.provenance() != Provenance::Detected {
                    self.stats.detection_fallback();
                }
                landmarks
            }
            _ => Landmarks::absent(),
        };
        chain.apply(&mut buffer, &landmarks, &self.pool)?;

        let mut composited = false;
        if let (Some(image), Some(masks)) = (&background.image, &self.masks) {
            let mask = masks.detect(&buffer);
            if mask.provenance() != Provenance::Detected {
                self.stats.detection_fallback();
            }
            if self.state.generation() != background.generation {
                self.pool.release_image(buffer.into_image());
                return Ok(Delivery::Discarded);
            }
            // No mask yet: the filtered frame goes out as is
            if let Some(mask) = mask.value() {
                buffer = self.compositor.compose(buffer, mask, image, &settings);
                composited = true;
            }
        }

        let out = format::encode_with(&buffer, target, &self.pool)?;
        self.pool.release_image(buffer.into_image());

        let generation = background.generation;
        let delivery = self
            .sink
            .emit_if(out, || !composited || self.state.generation() == generation);
        Ok(delivery)
    }

    fn record(&self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => {
                let emitted = self.stats.emitted();
                if self.stats_interval > 0 && emitted % self.stats_interval == 0 {
                    self.stats.log_summary();
                }
            }
            Delivery::Stale => self.stats.dropped_stale(),
            Delivery::Discarded => {
                tracing::debug!("Discarding frame composited with a replaced background");
                self.stats.discarded_background();
            }
            Delivery::ConsumerFailed => self.stats.consumer_error(),
        }
    }

    fn can_bypass(&self, frame: &Frame) -> bool {
        self.passthrough_bypass
            && self
                .output_format
                .map_or(true, |target| target.fourcc() == frame.format)
            && self.state.is_idle()
    }
}

/// Real-time frame pipeline
///
/// `submit` never blocks on processing: frames are either handed to the
/// worker, passed straight through, or dropped.
pub struct Pipeline {
    shared: Arc<Shared>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn builder(consumer: Box<dyn FrameConsumer>) -> PipelineBuilder {
        PipelineBuilder::new(consumer)
    }

    /// Offer a captured frame
    pub fn submit(&self, frame: Frame) -> Result<Submission> {
        let shared = &self.shared;
        shared.stats.received();

        if shared.can_bypass(&frame) {
            shared.stats.bypassed();
            let delivery = shared.sink.emit(frame);
            shared.record(delivery);
            return Ok(Submission::Bypassed(delivery));
        }

        match shared.governor.admit(frame.timestamp) {
            Admission::Admitted(flight) => {
                let jobs = self.jobs.as_ref().ok_or(PipelineError::WorkerUnavailable)?;
                match jobs.try_send(Job { frame, _flight: flight }) {
                    Ok(()) => {
                        shared.stats.admitted();
                        Ok(Submission::Admitted)
                    }
                    Err(TrySendError::Full(_)) => {
                        shared.stats.dropped_busy();
                        Ok(Submission::Dropped(DropReason::Busy))
                    }
                    Err(TrySendError::Disconnected(_)) => Err(PipelineError::WorkerUnavailable),
                }
            }
            Admission::TooSoon => {
                shared.stats.dropped_rate();
                tracing::trace!("Frame {} arrived too soon", frame.timestamp);
                Ok(Submission::Dropped(DropReason::TooSoon))
            }
            Admission::Busy => {
                shared.stats.dropped_busy();
                tracing::trace!("Frame {} dropped, worker busy", frame.timestamp);
                Ok(Submission::Dropped(DropReason::Busy))
            }
        }
    }

    /// Replace or clear the background. Once this returns, no frame composited
    /// with the previous background will reach the consumer.
    pub fn set_background_image(&self, image: Option<BackgroundImage>) {
        let cleared = image.is_none();
        let generation = self.shared.state.set_background(image);
        self.shared.sink.barrier();
        tracing::info!(
            "Background {} (generation {})",
            if cleared { "cleared" } else { "set" },
            generation
        );
    }

    pub fn set_confidence_threshold(&self, threshold: f64) -> Result<(), ConfigError> {
        self.shared.state.set_confidence(threshold).inspect_err(|e| {
            tracing::warn!("Rejected confidence threshold: {}", e);
        })
    }

    pub fn set_target_frame_rate(&self, fps: f64) -> Result<(), ConfigError> {
        self.shared.governor.set_target_frame_rate(fps).inspect_err(|e| {
            tracing::warn!("Rejected frame rate: {}", e);
        })
    }

    /// Returns `Ok(false)` when the value was already in effect
    pub fn set_filter_parameter(&self, stage: &str, key: &str, value: f32) -> Result<bool, ConfigError> {
        self.shared
            .state
            .set_filter_parameter(stage, key, value)
            .inspect_err(|e| tracing::warn!("Rejected filter parameter: {}", e))
    }

    pub fn filter_parameter(&self, stage: &str, key: &str) -> Option<f32> {
        self.shared.state.filter_parameter(stage, key)
    }

    pub fn set_blend_policy(&self, policy: BlendPolicy) {
        self.shared.state.set_blend_policy(policy);
    }

    pub fn set_fit_mode(&self, fit: Option<FitMode>) {
        self.shared.state.set_fit_mode(fit);
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.shared.state.confidence()
    }

    pub fn target_interval(&self) -> Duration {
        self.shared.governor.interval()
    }

    /// Drop cached detections and model state; settings and the sink's
    /// high-water mark are kept
    pub fn reset(&self) {
        let shared = &self.shared;
        shared.governor.reset();
        if let Some(landmarks) = &shared.landmarks {
            landmarks.reset();
        }
        if let Some(masks) = &shared.masks {
            masks.reset();
        }
        shared.compositor.clear_cache();
        shared.pool.clear();
        tracing::info!("Pipeline reset");
    }

    /// Whether a frame is being processed right now
    pub fn is_busy(&self) -> bool {
        self.shared.governor.is_busy()
    }

    /// Wait for the frame in flight to finish; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn log_stats(&self) {
        self.shared.stats.log_summary();
    }

    /// Stop the worker and release every resource
    pub fn dispose(self) {
        drop(self);
    }

    fn shutdown(&mut self) {
        // Closing the channel ends the worker loop after the current frame
        self.jobs = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("pipeline worker panicked");
            }
        }
        if let Some(landmarks) = &self.shared.landmarks {
            landmarks.reset();
        }
        if let Some(masks) = &self.shared.masks {
            masks.reset();
        }
        self.shared.pool.clear();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
