//! Mutable pipeline settings shared between the control surface and the worker
//!
//! One lock or atomic per field; nothing here serializes unrelated settings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::config::validate_threshold;
use crate::compositor::{BackgroundImage, BlendPolicy, CompositeSettings, FitMode};
use crate::error::ConfigError;
use crate::filters::FilterChain;

/// The background in effect and the generation it was set in
#[derive(Clone, Debug)]
pub struct BackgroundSnapshot {
    pub image: Option<Arc<BackgroundImage>>,
    pub generation: u64,
}

#[derive(Debug)]
pub struct PipelineState {
    /// Guarded together with its generation so readers see a matching pair
    background: RwLock<(Option<Arc<BackgroundImage>>, u64)>,
    /// Mirrors the generation for lock-free staleness checks
    generation: AtomicU64,
    confidence_bits: AtomicU64,
    blend: Mutex<BlendPolicy>,
    fit: Mutex<Option<FitMode>>,
    filters: Mutex<Arc<FilterChain>>,
}

impl PipelineState {
    pub fn new(confidence: f64, blend: BlendPolicy, fit: Option<FitMode>, filters: FilterChain) -> Result<Self, ConfigError> {
        validate_threshold(confidence)?;
        Ok(Self {
            background: RwLock::new((None, 0)),
            generation: AtomicU64::new(0),
            confidence_bits: AtomicU64::new(confidence.to_bits()),
            blend: Mutex::new(blend),
            fit: Mutex::new(fit),
            filters: Mutex::new(Arc::new(filters)),
        })
    }

    pub fn background(&self) -> BackgroundSnapshot {
        let guard = self.background.read();
        BackgroundSnapshot {
            image: guard.0.clone(),
            generation: guard.1,
        }
    }

    /// Replace or clear the background, starting a new generation
    pub fn set_background(&self, image: Option<BackgroundImage>) -> u64 {
        let mut guard = self.background.write();
        guard.0 = image.map(Arc::new);
        guard.1 += 1;
        self.generation.store(guard.1, Ordering::Release);
        guard.1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn has_background(&self) -> bool {
        self.background.read().0.is_some()
    }

    pub fn confidence(&self) -> f64 {
        f64::from_bits(self.confidence_bits.load(Ordering::Acquire))
    }

    pub fn set_confidence(&self, threshold: f64) -> Result<(), ConfigError> {
        validate_threshold(threshold)?;
        self.confidence_bits.store(threshold.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn blend_policy(&self) -> BlendPolicy {
        *self.blend.lock()
    }

    pub fn set_blend_policy(&self, policy: BlendPolicy) {
        *self.blend.lock() = policy;
    }

    pub fn set_fit_mode(&self, fit: Option<FitMode>) {
        *self.fit.lock() = fit;
    }

    pub fn composite_settings(&self) -> CompositeSettings {
        CompositeSettings {
            threshold: self.confidence() as f32,
            policy: self.blend_policy(),
            fit: *self.fit.lock(),
        }
    }

    /// Snapshot of the chain; later parameter changes do not affect it
    pub fn filters(&self) -> Arc<FilterChain> {
        Arc::clone(&self.filters.lock())
    }

    pub fn set_filter_parameter(&self, stage: &str, key: &str, value: f32) -> Result<bool, ConfigError> {
        let mut filters = self.filters.lock();
        if filters.parameter(stage, key) == Some(value) {
            return Ok(false);
        }
        Arc::make_mut(&mut filters).set_parameter(stage, key, value)
    }

    pub fn filter_parameter(&self, stage: &str, key: &str) -> Option<f32> {
        self.filters.lock().parameter(stage, key)
    }

    /// Nothing to do for a frame: no background and no active filter
    pub fn is_idle(&self) -> bool {
        !self.has_background() && !self.filters.lock().is_active()
    }
}
