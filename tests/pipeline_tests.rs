use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use callfx::detection::{LandmarkDetector, Mask, Point2, Segmenter};
use callfx::error::{ConfigError, PipelineError};
use callfx::output::ChannelOutput;
use callfx::pipeline::{DropReason, Pipeline, PipelineConfig, Submission};
use callfx::sink::Delivery;
use callfx::{BackgroundImage, FourCc, Frame, PixelFormat, Plane, Rotation, Timestamp};
use crossbeam_channel::Receiver;
use image::{Rgba, RgbaImage};

const MS: u64 = 1_000_000;

fn rgba_frame(ts_ms: u64, color: [u8; 4]) -> Frame {
    let (width, height) = (8u32, 8u32);
    let data = color.repeat((width * height) as usize);
    Frame::new(
        vec![Plane::new(data, width as usize * 4)],
        width,
        height,
        PixelFormat::Rgba.fourcc(),
        Rotation::Deg0,
        Timestamp::from_nanos(ts_ms * MS),
    )
}

fn frame(ts_ms: u64) -> Frame {
    rgba_frame(ts_ms, [120, 90, 60, 255])
}

fn uniform_background(color: [u8; 4]) -> BackgroundImage {
    BackgroundImage::upright(RgbaImage::from_pixel(8, 8, Rgba(color)))
}

fn received_millis(frames: &Receiver<Frame>) -> Vec<u64> {
    frames.try_iter().map(|f| f.timestamp.as_nanos() / MS).collect()
}

fn settle(pipeline: &Pipeline) {
    assert!(pipeline.wait_idle(Duration::from_secs(5)), "pipeline never went idle");
}

/// Segmenter returning a fixed probability after an optional delay
struct FixedSegmenter {
    probability: f32,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FixedSegmenter {
    fn new(probability: f32, delay: Duration) -> Self {
        Self {
            probability,
            delay,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Segmenter for FixedSegmenter {
    fn segment(&mut self, image: &RgbaImage) -> anyhow::Result<Mask> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Mask::uniform(image.width() / 2, image.height() / 2, self.probability))
    }
}

/// Landmark detector that answers once, then fails every call
struct OneShotDetector {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl LandmarkDetector for OneShotDetector {
    fn detect(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<Point2>> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![Point2::new(0.5, 0.5); 106])
        } else {
            bail!("face lost")
        }
    }
}

#[test]
fn idle_pipeline_passes_frames_straight_through() {
    let (output, frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output)).build().unwrap();

    let input = frame(0);
    assert_eq!(pipeline.submit(input.clone()).unwrap(), Submission::Bypassed(Delivery::Delivered));
    assert_eq!(frames.try_recv().unwrap(), input);

    // Passthrough still enforces monotonic timestamps
    assert_eq!(pipeline.submit(frame(0)).unwrap(), Submission::Bypassed(Delivery::Stale));
    assert!(frames.try_recv().is_err());

    let stats = pipeline.stats();
    assert_eq!(stats.bypassed, 2);
    assert_eq!(stats.admitted, 0);
}

#[test]
fn governor_admits_exactly_at_the_interval() {
    let (output, frames) = ChannelOutput::new();
    let config = PipelineConfig {
        frame_rate: 10.0,
        ..Default::default()
    };
    let pipeline = Pipeline::builder(Box::new(output)).config(config).build().unwrap();
    assert!(pipeline.set_filter_parameter("color", "contrast", 1.2).unwrap());

    assert_eq!(pipeline.submit(frame(0)).unwrap(), Submission::Admitted);
    settle(&pipeline);
    assert_eq!(pipeline.submit(frame(99)).unwrap(), Submission::Dropped(DropReason::TooSoon));
    assert_eq!(pipeline.submit(frame(100)).unwrap(), Submission::Admitted);
    settle(&pipeline);

    assert_eq!(received_millis(&frames), vec![0, 100]);
    let stats = pipeline.stats();
    assert_eq!(stats.dropped_rate, 1);
    assert_eq!(stats.emitted, 2);
}

#[test]
fn frames_arriving_during_processing_are_dropped_not_queued() {
    let (output, frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output))
        .segmenter(Box::new(FixedSegmenter::new(1.0, Duration::from_millis(150))))
        .background(uniform_background([0, 0, 255, 255]))
        .build()
        .unwrap();

    assert_eq!(pipeline.submit(frame(0)).unwrap(), Submission::Admitted);
    assert!(pipeline.is_busy());
    assert_eq!(pipeline.submit(frame(1000)).unwrap(), Submission::Dropped(DropReason::Busy));
    settle(&pipeline);

    assert_eq!(received_millis(&frames), vec![0]);
    assert_eq!(pipeline.stats().dropped_busy, 1);
}

#[test]
fn models_never_run_concurrently_under_load() {
    let (output, frames) = ChannelOutput::new();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let segmenter = FixedSegmenter {
        probability: 1.0,
        delay: Duration::from_millis(2),
        running: Arc::clone(&running),
        peak: Arc::clone(&peak),
    };
    let detector = OneShotDetector {
        calls: Arc::new(AtomicUsize::new(0)),
        delay: Duration::from_millis(3),
        running: Arc::clone(&running),
        peak: Arc::clone(&peak),
    };
    // Shorter than the detector so timed-out inferences overlap the next request
    let config = PipelineConfig {
        frame_rate: 240.0,
        detection_timeout: Duration::from_millis(1),
        ..Default::default()
    };
    let pipeline = Pipeline::builder(Box::new(output))
        .config(config)
        .landmark_detector(Box::new(detector))
        .segmenter(Box::new(segmenter))
        .background(uniform_background([0, 255, 0, 255]))
        .build()
        .unwrap();
    pipeline.set_filter_parameter("lipstick", "blend_level", 0.5).unwrap();

    let clock = AtomicU64::new(0);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let ts = clock.fetch_add(5, Ordering::SeqCst);
                    pipeline.submit(frame(ts)).unwrap();
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
        }
    });
    settle(&pipeline);
    // Let any timed-out inference finish before reading the peak
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let emitted = received_millis(&frames);
    assert!(!emitted.is_empty());
    assert!(emitted.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", emitted);

    let stats = pipeline.stats();
    assert_eq!(stats.received, 200);
    assert_eq!(stats.admitted + stats.dropped_rate + stats.dropped_busy, 200);
}

#[test]
fn frame_composited_with_replaced_background_is_discarded() {
    let (output, frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output))
        .segmenter(Box::new(FixedSegmenter::new(0.0, Duration::from_millis(100))))
        .background(uniform_background([255, 0, 0, 255]))
        .build()
        .unwrap();

    assert_eq!(pipeline.submit(frame(0)).unwrap(), Submission::Admitted);
    std::thread::sleep(Duration::from_millis(20));
    pipeline.set_background_image(Some(uniform_background([0, 0, 255, 255])));
    settle(&pipeline);

    assert!(frames.try_recv().is_err());
    assert_eq!(pipeline.stats().discarded_background, 1);

    // The next frame uses the new background
    assert_eq!(pipeline.submit(frame(1000)).unwrap(), Submission::Admitted);
    settle(&pipeline);
    let out = frames.try_recv().unwrap();
    assert_eq!(out.timestamp, Timestamp::from_nanos(1000 * MS));
    assert_eq!(&out.planes[0].data[..4], &[0, 0, 255, 255]);
}

#[test]
fn clearing_background_mid_frame_never_emits_out_of_order() {
    let (output, frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output))
        .segmenter(Box::new(FixedSegmenter::new(0.0, Duration::from_millis(150))))
        .background(uniform_background([255, 0, 0, 255]))
        .build()
        .unwrap();

    assert_eq!(pipeline.submit(frame(0)).unwrap(), Submission::Admitted);
    std::thread::sleep(Duration::from_millis(20));
    pipeline.set_background_image(None);

    // Nothing left to do: the next frame overtakes the one still in flight
    let passthrough = frame(200);
    assert_eq!(
        pipeline.submit(passthrough.clone()).unwrap(),
        Submission::Bypassed(Delivery::Delivered)
    );
    settle(&pipeline);

    assert_eq!(frames.try_iter().collect::<Vec<_>>(), vec![passthrough]);
    let stats = pipeline.stats();
    assert_eq!(stats.dropped_stale + stats.discarded_background, 1);
}

#[test]
fn invalid_configuration_is_rejected() {
    let (output, _frames) = ChannelOutput::new();
    let config = PipelineConfig {
        frame_rate: 0.0,
        ..Default::default()
    };
    let err = Pipeline::builder(Box::new(output)).config(config).build().err().unwrap();
    assert!(matches!(err, PipelineError::Config(ConfigError::FrameRateOutOfRange(_))));

    let (output, _frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output)).build().unwrap();
    let interval = pipeline.target_interval();

    assert_eq!(
        pipeline.set_confidence_threshold(1.5),
        Err(ConfigError::ThresholdOutOfRange(1.5))
    );
    assert_eq!(pipeline.confidence_threshold(), 0.7);

    assert!(pipeline.set_target_frame_rate(1000.0).is_err());
    assert!(pipeline.set_target_frame_rate(f64::NAN).is_err());
    assert_eq!(pipeline.target_interval(), interval);

    assert!(pipeline.set_filter_parameter("color", "contrast", 5.0).is_err());
    assert!(pipeline.set_filter_parameter("sparkle", "amount", 0.5).is_err());
    assert!(pipeline.set_filter_parameter("style", "effect", 2.5).is_err());
    assert_eq!(pipeline.filter_parameter("color", "contrast"), Some(1.0));

    pipeline.set_target_frame_rate(30.0).unwrap();
    assert!(pipeline.target_interval() < interval);
}

#[test]
fn failed_detections_fall_back_to_cached_landmarks() {
    let (output, frames) = ChannelOutput::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let detector = OneShotDetector {
        calls: Arc::clone(&calls),
        delay: Duration::ZERO,
        running: Arc::new(AtomicUsize::new(0)),
        peak: Arc::new(AtomicUsize::new(0)),
    };
    let pipeline = Pipeline::builder(Box::new(output))
        .landmark_detector(Box::new(detector))
        .build()
        .unwrap();
    pipeline.set_filter_parameter("blusher", "blend_level", 0.8).unwrap();

    for ts in [0, 1000, 2000] {
        assert_eq!(pipeline.submit(frame(ts)).unwrap(), Submission::Admitted);
        settle(&pipeline);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(received_millis(&frames), vec![0, 1000, 2000]);
    assert_eq!(pipeline.stats().detection_fallbacks, 2);
}

#[test]
fn undecodable_frame_is_dropped_and_pipeline_continues() {
    let (output, frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output)).build().unwrap();
    pipeline.set_filter_parameter("color", "saturation", 1.5).unwrap();

    let mut bad = frame(0);
    bad.format = FourCc::new(b"MJPG");
    assert_eq!(pipeline.submit(bad).unwrap(), Submission::Admitted);
    settle(&pipeline);
    assert!(frames.try_recv().is_err());
    assert_eq!(pipeline.stats().format_errors, 1);

    assert_eq!(pipeline.submit(frame(1000)).unwrap(), Submission::Admitted);
    settle(&pipeline);
    assert_eq!(received_millis(&frames), vec![1000]);
}

#[test]
fn output_format_is_converted() {
    let (output, frames) = ChannelOutput::new();
    let config = PipelineConfig {
        output_format: Some(PixelFormat::I420),
        ..Default::default()
    };
    let pipeline = Pipeline::builder(Box::new(output)).config(config).build().unwrap();

    // Format conversion is work, so even an idle pipeline admits the frame
    assert_eq!(pipeline.submit(frame(0)).unwrap(), Submission::Admitted);
    settle(&pipeline);
    let out = frames.try_recv().unwrap();
    assert_eq!(out.format, PixelFormat::I420.fourcc());
    assert_eq!(out.dimensions(), (8, 8));
    assert_eq!(out.planes.len(), 3);
}

#[test]
fn reset_keeps_the_emission_high_water_mark() {
    let (output, frames) = ChannelOutput::new();
    let pipeline = Pipeline::builder(Box::new(output)).build().unwrap();
    pipeline.set_filter_parameter("color", "brightness", 1.1).unwrap();

    assert_eq!(pipeline.submit(frame(500)).unwrap(), Submission::Admitted);
    settle(&pipeline);
    pipeline.reset();

    assert_eq!(pipeline.filter_parameter("color", "brightness"), Some(1.1));
    assert_eq!(pipeline.submit(frame(100)).unwrap(), Submission::Admitted);
    settle(&pipeline);

    assert_eq!(received_millis(&frames), vec![500]);
    assert_eq!(pipeline.stats().dropped_stale, 1);
    pipeline.dispose();
}
