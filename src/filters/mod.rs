//! Ordered chain of cosmetic and style stages
//!
//! Each stage exposes a few range-bounded knobs. Setting a knob to the value it
//! already holds is a no-op, so slider spam from the UI costs nothing.

mod beauty;
mod color;
mod face;
pub mod kernels;
mod style;

pub use beauty::BeautyFace;
pub use color::ColorAdjust;
pub use face::{layout, Blusher, FaceReshape, Lipstick};
pub use style::{StyleEffect, StylePreset};

use std::collections::BTreeMap;
use std::fmt;

use image::RgbaImage;

use crate::detection::Landmarks;
use crate::error::{ConfigError, Result};
use crate::format::{BufferPool, CanonicalBuffer};
use crate::frame::Timestamp;

/// A named, range-bounded stage parameter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Knob {
    pub key: &'static str,
    pub min: f32,
    pub max: f32,
    /// Value at which the knob has no visible effect
    pub neutral: f32,
    pub integral: bool,
}

impl Knob {
    pub const fn new(key: &'static str, min: f32, max: f32, neutral: f32) -> Self {
        Self {
            key,
            min,
            max,
            neutral,
            integral: false,
        }
    }

    pub const fn integral(key: &'static str, min: f32, max: f32, neutral: f32) -> Self {
        Self {
            key,
            min,
            max,
            neutral,
            integral: true,
        }
    }
}

/// What a stage gets to look at besides the pixels
pub struct StageContext<'a> {
    pub landmarks: &'a Landmarks,
    pub timestamp: Timestamp,
    pub pool: &'a BufferPool,
}

/// One transformation in the chain
///
/// `apply` must be a pure function of the image, the knob values and the
/// context; stages keep no per-frame state.
pub trait FilterStage: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn knobs(&self) -> &'static [Knob];

    /// Called only when a knob's value actually changes; the value is already validated
    fn configure(&mut self, key: &str, value: f32);

    /// Whether any knob is away from neutral
    fn is_active(&self) -> bool;

    /// Stages that need face landmarks are skipped when none are available
    fn needs_landmarks(&self) -> bool {
        false
    }

    fn apply(&self, image: &mut RgbaImage, ctx: &StageContext<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn FilterStage>;
}

impl Clone for Box<dyn FilterStage> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Current knob values, per stage
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterParameters {
    values: BTreeMap<&'static str, BTreeMap<&'static str, f32>>,
}

impl FilterParameters {
    pub fn get(&self, stage: &str, key: &str) -> Option<f32> {
        self.values.get(stage)?.get(key).copied()
    }

    fn set(&mut self, stage: &'static str, key: &'static str, value: f32) {
        self.values.entry(stage).or_default().insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str, f32)> + '_ {
        self.values
            .iter()
            .flat_map(|(stage, knobs)| knobs.iter().map(move |(key, value)| (*stage, *key, *value)))
    }
}

/// Stages applied in declaration order
#[derive(Clone, Debug)]
pub struct FilterChain {
    stages: Vec<Box<dyn FilterStage>>,
    parameters: FilterParameters,
    revision: u64,
}

impl FilterChain {
    pub fn new(stages: Vec<Box<dyn FilterStage>>) -> Self {
        let mut parameters = FilterParameters::default();
        for stage in &stages {
            for knob in stage.knobs() {
                parameters.set(stage.name(), knob.key, knob.neutral);
            }
        }
        Self {
            stages,
            parameters,
            revision: 0,
        }
    }

    /// color → lipstick → blusher → reshape → beauty → style
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ColorAdjust::default()),
            Box::new(Lipstick::default()),
            Box::new(Blusher::default()),
            Box::new(FaceReshape::default()),
            Box::new(BeautyFace::default()),
            Box::new(StylePreset::default()),
        ])
    }

    /// Set a knob. Returns `Ok(false)` when the value was already in effect.
    pub fn set_parameter(&mut self, stage: &str, key: &str, value: f32) -> Result<bool, ConfigError> {
        let target = self
            .stages
            .iter_mut()
            .find(|s| s.name() == stage)
            .ok_or_else(|| ConfigError::UnknownStage(stage.to_string()))?;
        let knob = *target
            .knobs()
            .iter()
            .find(|k| k.key == key)
            .ok_or_else(|| ConfigError::UnknownParameter {
                stage: stage.to_string(),
                key: key.to_string(),
            })?;

        if !value.is_finite() || value < knob.min || value > knob.max {
            return Err(ConfigError::ParameterOutOfRange {
                stage: stage.to_string(),
                key: key.to_string(),
                value,
                min: knob.min,
                max: knob.max,
            });
        }
        if knob.integral && value.fract() != 0.0 {
            return Err(ConfigError::NotIntegral {
                stage: stage.to_string(),
                key: key.to_string(),
                value,
            });
        }

        if self.parameters.get(stage, key) == Some(value) {
            return Ok(false);
        }

        target.configure(knob.key, value);
        let name = target.name();
        self.parameters.set(name, knob.key, value);
        self.revision += 1;
        tracing::debug!("{}.{} = {}", name, knob.key, value);
        Ok(true)
    }

    pub fn parameter(&self, stage: &str, key: &str) -> Option<f32> {
        self.parameters.get(stage, key)
    }

    pub fn parameters(&self) -> &FilterParameters {
        &self.parameters
    }

    /// Bumped on every effective parameter change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|s| s.name())
    }

    pub fn is_active(&self) -> bool {
        self.stages.iter().any(|s| s.is_active())
    }

    pub fn needs_landmarks(&self) -> bool {
        self.stages.iter().any(|s| s.is_active() && s.needs_landmarks())
    }

    /// Return every knob to neutral
    pub fn reset(&mut self) {
        let neutral: Vec<_> = self
            .stages
            .iter()
            .flat_map(|s| s.knobs().iter().map(move |k| (s.name(), k.key, k.neutral)))
            .collect();
        for (stage, key, value) in neutral {
            // Neutral values are always in range
            let _ = self.set_parameter(stage, key, value);
        }
    }

    /// Run every active stage over the buffer, in order
    pub fn apply(&self, buffer: &mut CanonicalBuffer, landmarks: &Landmarks, pool: &BufferPool) -> Result<()> {
        let _span = tracing::debug_span!("filter_chain").entered();

        let ctx = StageContext {
            landmarks,
            timestamp: buffer.timestamp(),
            pool,
        };
        for stage in &self.stages {
            if !stage.is_active() {
                continue;
            }
            if stage.needs_landmarks() && landmarks.is_absent() {
                tracing::trace!("{} skipped: no landmarks", stage.name());
                continue;
            }
            stage.apply(buffer.image_mut(), &ctx)?;
        }
        Ok(())
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Point2;
    use crate::frame::Rotation;
    use image::Rgba;

    fn buffer() -> CanonicalBuffer {
        let image = RgbaImage::from_fn(16, 12, |x, y| Rgba([(x * 15) as u8, (y * 20) as u8, 100, 255]));
        CanonicalBuffer::new(image, Rotation::Deg0, Timestamp::from_nanos(5))
    }

    #[test]
    fn neutral_chain_is_inactive_and_leaves_pixels_alone() {
        let chain = FilterChain::standard();
        assert!(!chain.is_active());
        let mut frame = buffer();
        let before = frame.clone();
        chain.apply(&mut frame, &Landmarks::absent(), &BufferPool::new(2)).unwrap();
        assert_eq!(frame, before);
    }

    #[test]
    fn setting_the_same_value_is_a_no_op() {
        let mut chain = FilterChain::standard();
        assert_eq!(chain.set_parameter("color", "contrast", 1.5), Ok(true));
        let revision = chain.revision();
        assert_eq!(chain.set_parameter("color", "contrast", 1.5), Ok(false));
        assert_eq!(chain.revision(), revision);
        assert_eq!(chain.parameter("color", "contrast"), Some(1.5));
    }

    #[test]
    fn neutral_value_on_fresh_chain_is_a_no_op() {
        let mut chain = FilterChain::standard();
        assert_eq!(chain.set_parameter("beauty", "smoothing", 0.0), Ok(false));
        assert_eq!(chain.revision(), 0);
    }

    #[test]
    fn invalid_parameters_are_rejected_and_keep_previous_value() {
        let mut chain = FilterChain::standard();
        chain.set_parameter("color", "brightness", 1.2).unwrap();

        assert!(matches!(
            chain.set_parameter("color", "brightness", 2.5),
            Err(ConfigError::ParameterOutOfRange { .. })
        ));
        assert!(matches!(
            chain.set_parameter("color", "brightness", f32::NAN),
            Err(ConfigError::ParameterOutOfRange { .. })
        ));
        assert!(matches!(
            chain.set_parameter("colour", "brightness", 1.0),
            Err(ConfigError::UnknownStage(_))
        ));
        assert!(matches!(
            chain.set_parameter("color", "gamma", 1.0),
            Err(ConfigError::UnknownParameter { .. })
        ));
        assert!(matches!(
            chain.set_parameter("style", "effect", 1.5),
            Err(ConfigError::NotIntegral { .. })
        ));
        assert_eq!(chain.parameter("color", "brightness"), Some(1.2));
    }

    #[test]
    fn landmark_stages_pass_through_without_landmarks() {
        let mut chain = FilterChain::standard();
        chain.set_parameter("lipstick", "blend_level", 1.0).unwrap();
        chain.set_parameter("reshape", "big_eye", 1.0).unwrap();
        assert!(chain.needs_landmarks());

        let mut frame = buffer();
        let before = frame.clone();
        chain.apply(&mut frame, &Landmarks::absent(), &BufferPool::new(2)).unwrap();
        assert_eq!(frame, before);
    }

    #[test]
    fn landmark_stages_tolerate_short_landmark_sets() {
        let mut chain = FilterChain::standard();
        chain.set_parameter("lipstick", "blend_level", 1.0).unwrap();
        let landmarks = Landmarks::from_model(vec![Point2::new(0.5, 0.5)], Timestamp::from_nanos(1));

        let mut frame = buffer();
        let before = frame.clone();
        chain.apply(&mut frame, &landmarks, &BufferPool::new(2)).unwrap();
        assert_eq!(frame, before);
    }

    #[test]
    fn stages_run_in_declaration_order() {
        // Brightness 0 blacks out the frame before the style stage sees it,
        // so a sepia preset afterwards must leave it black.
        let mut chain = FilterChain::standard();
        assert_eq!(
            chain.stage_names().collect::<Vec<_>>(),
            ["color", "lipstick", "blusher", "reshape", "beauty", "style"]
        );
        chain.set_parameter("color", "brightness", 0.0).unwrap();
        chain.set_parameter("style", "effect", StyleEffect::Classic.index()).unwrap();
        let mut frame = buffer();
        chain.apply(&mut frame, &Landmarks::absent(), &BufferPool::new(2)).unwrap();
        assert!(frame.image().pixels().all(|p| p[0] == 0 && p[1] == 0 && p[2] == 0));
    }

    #[test]
    fn reset_returns_to_neutral() {
        let mut chain = FilterChain::standard();
        chain.set_parameter("beauty", "whiteness", 0.4).unwrap();
        chain.set_parameter("style", "effect", 3.0).unwrap();
        assert!(chain.is_active());
        chain.reset();
        assert!(!chain.is_active());
        assert_eq!(chain.parameter("style", "effect"), Some(0.0));
    }

    #[test]
    fn cloned_chain_is_independent() {
        let mut chain = FilterChain::standard();
        let snapshot = chain.clone();
        chain.set_parameter("color", "saturation", 0.0).unwrap();
        assert!(!snapshot.is_active());
        assert!(chain.is_active());
    }
}
