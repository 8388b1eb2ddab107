//! Landmark detection and person segmentation with last-good-result caching
//!
//! Models run on a dedicated inference thread. Callers wait for at most the
//! configured timeout; whenever the model is busy, fails, times out or comes
//! back empty, the last good result is served instead.

pub mod types;

pub use types::{
    Detection, DetectionOutput, LandmarkDetector, Landmarks, Mask, Point2, Provenance, Segmenter,
};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use image::RgbaImage;
use parking_lot::Mutex;

use crate::error::{PipelineError, Result};
use crate::flight::{FlightGuard, SingleFlight};
use crate::format::{BufferPool, CanonicalBuffer};
use crate::frame::{Rotation, Timestamp};

/// Uniform call surface over the detector and segmenter seams
trait Model<T>: Send {
    fn run(&mut self, image: &RgbaImage) -> anyhow::Result<T>;
    fn reset_state(&mut self);
}

impl Model<Vec<Point2>> for Box<dyn LandmarkDetector> {
    fn run(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<Point2>> {
        self.detect(image)
    }

    fn reset_state(&mut self) {
        LandmarkDetector::reset_state(self.as_mut());
    }
}

impl Model<Mask> for Box<dyn Segmenter> {
    fn run(&mut self, image: &RgbaImage) -> anyhow::Result<Mask> {
        self.segment(image)
    }

    fn reset_state(&mut self) {
        Segmenter::reset_state(self.as_mut());
    }
}

struct Job<T> {
    image: RgbaImage,
    rotation: Rotation,
    timestamp: Timestamp,
    epoch: u64,
    reply: Sender<Option<Detection<T>>>,
    _flight: FlightGuard,
}

enum Request<T> {
    Detect(Job<T>),
    Reset,
}

struct Cache<T> {
    latest: Mutex<Option<(Arc<T>, Timestamp)>>,
    epoch: AtomicU64,
}

impl<T: DetectionOutput> Cache<T> {
    /// Record a fresh result; only newer frames from the current epoch replace the cache
    fn store(&self, value: T, timestamp: Timestamp, epoch: u64) -> Detection<T> {
        let value = Arc::new(value);
        let mut latest = self.latest.lock();
        let newer = latest.as_ref().map_or(true, |(_, cached)| timestamp > *cached);
        if newer && self.epoch.load(Ordering::Acquire) == epoch {
            *latest = Some((Arc::clone(&value), timestamp));
        }
        Detection::detected(value, timestamp)
    }

    fn current(&self) -> Detection<T> {
        match self.latest.lock().as_ref() {
            Some((value, timestamp)) => Detection::cached(Arc::clone(value), *timestamp),
            None => Detection::absent(),
        }
    }

    fn clear(&self) {
        let mut latest = self.latest.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        *latest = None;
    }
}

/// Runs one model off-thread and serves its last good result on failure
pub struct DetectionCache<T: DetectionOutput> {
    name: &'static str,
    cache: Arc<Cache<T>>,
    flight: SingleFlight,
    // Upright copies handed to the inference thread and returned after the run
    pool: Arc<BufferPool>,
    timeout: Duration,
    requests: Option<Sender<Request<T>>>,
    worker: Option<JoinHandle<()>>,
}

/// Landmark detector behind a cache
pub type LandmarkCache = DetectionCache<Vec<Point2>>;

/// Segmenter behind a cache
pub type MaskCache = DetectionCache<Mask>;

impl DetectionCache<Vec<Point2>> {
    pub fn landmarks(
        detector: Box<dyn LandmarkDetector>,
        timeout: Duration,
        flight: SingleFlight,
    ) -> Result<Self> {
        Self::spawn("landmarks", detector, timeout, flight)
    }
}

impl DetectionCache<Mask> {
    pub fn masks(segmenter: Box<dyn Segmenter>, timeout: Duration, flight: SingleFlight) -> Result<Self> {
        Self::spawn("segmentation", segmenter, timeout, flight)
    }
}

impl<T: DetectionOutput> DetectionCache<T> {
    fn spawn<M>(name: &'static str, mut model: M, timeout: Duration, flight: SingleFlight) -> Result<Self>
    where
        M: Model<T> + 'static,
    {
        let cache = Arc::new(Cache {
            latest: Mutex::new(None),
            epoch: AtomicU64::new(0),
        });
        let (requests, receiver) = crossbeam_channel::unbounded::<Request<T>>();

        let pool = Arc::new(BufferPool::new(2));
        let worker_cache = Arc::clone(&cache);
        let worker_pool = Arc::clone(&pool);
        let worker = std::thread::Builder::new()
            .name(format!("{}-inference", name))
            .spawn(move || {
                tracing::debug!("{} inference thread started", name);
                while let Ok(request) = receiver.recv() {
                    match request {
                        Request::Detect(job) => {
                            Self::run_job(name, &mut model, &worker_cache, &worker_pool, job)
                        }
                        Request::Reset => model.reset_state(),
                    }
                }
                tracing::debug!("{} inference thread stopped", name);
            })
            .map_err(|source| PipelineError::Spawn { worker: name, source })?;

        Ok(Self {
            name,
            cache,
            flight,
            pool,
            timeout,
            requests: Some(requests),
            worker: Some(worker),
        })
    }

    fn run_job<M: Model<T>>(name: &'static str, model: &mut M, cache: &Cache<T>, pool: &BufferPool, job: Job<T>) {
        let Job {
            image,
            rotation,
            timestamp,
            epoch,
            reply,
            _flight,
        } = job;

        let outcome = catch_unwind(AssertUnwindSafe(|| model.run(&image)));
        pool.release_image(image);
        let detection = match outcome {
            Ok(Ok(value)) if !value.is_empty() => {
                Some(cache.store(value.into_buffer_space(rotation), timestamp, epoch))
            }
            Ok(Ok(_)) => {
                tracing::debug!("{} returned nothing for frame {}", name, timestamp);
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("{} failed for frame {}: {:#}", name, timestamp, e);
                None
            }
            Err(_) => {
                tracing::warn!("{} panicked on frame {}", name, timestamp);
                None
            }
        };

        // Free the slot before answering so the caller can issue the next request
        drop(_flight);
        let _ = reply.send(detection);
    }

    /// Result for `buffer`: fresh when the model answers in time, cached otherwise
    pub fn detect(&self, buffer: &CanonicalBuffer) -> Detection<T> {
        let _span = tracing::debug_span!("detect", model = self.name).entered();

        let Some(flight) = self.flight.try_acquire() else {
            tracing::trace!("{} busy, serving cache", self.name);
            return self.cache.current();
        };
        let Some(requests) = &self.requests else {
            return self.cache.current();
        };

        let image = match buffer.upright_with(&self.pool) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("{} could not stage frame {}: {}", self.name, buffer.timestamp(), e);
                return self.cache.current();
            }
        };

        let (reply, response) = crossbeam_channel::bounded(1);
        let job = Job {
            image,
            rotation: buffer.rotation(),
            timestamp: buffer.timestamp(),
            epoch: self.cache.epoch.load(Ordering::Acquire),
            reply,
            _flight: flight,
        };
        if requests.send(Request::Detect(job)).is_err() {
            tracing::warn!("{} inference thread is gone", self.name);
            return self.cache.current();
        }

        match response.recv_timeout(self.timeout) {
            Ok(Some(detection)) => detection,
            Ok(None) | Err(RecvTimeoutError::Disconnected) => self.cache.current(),
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!("{} timed out after {:?}", self.name, self.timeout);
                self.cache.current()
            }
        }
    }

    /// The cached result without invoking the model
    pub fn cached(&self) -> Detection<T> {
        self.cache.current()
    }

    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Drop the cached result and reset the model's temporal state
    pub fn reset(&self) {
        self.cache.clear();
        if let Some(requests) = &self.requests {
            let _ = requests.send(Request::Reset);
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: DetectionOutput> Drop for DetectionCache<T> {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.requests = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::warn!("{} inference thread panicked", self.name);
            }
        }
    }
}
