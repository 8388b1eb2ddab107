use std::time::Duration;

use crate::compositor::{BlendPolicy, CompositorKind, FitMode};
use crate::error::ConfigError;
use crate::frame::PixelFormat;
use crate::governor::validate_frame_rate;

/// Startup configuration; the runtime setters on `Pipeline` apply the same checks
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Target admission rate in frames per second
    pub frame_rate: f64,
    /// Mask probability at or above which a pixel is foreground
    pub confidence_threshold: f64,
    /// How long a frame waits for a detector before falling back to the cache
    pub detection_timeout: Duration,
    pub blend_policy: BlendPolicy,
    /// `None` picks contain/cover from the frame rotation
    pub fit_mode: Option<FitMode>,
    /// `None` emits frames in the format they arrived in
    pub output_format: Option<PixelFormat>,
    /// `None` detects the best variant at startup
    pub compositor: Option<CompositorKind>,
    pub pool_capacity: usize,
    /// Skip the governor entirely while there is nothing to do
    pub passthrough_bypass: bool,
    /// Emitted frames between statistics lines, 0 disables them
    pub stats_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_rate: 24.0,
            confidence_threshold: 0.7,
            detection_timeout: Duration::from_millis(250),
            blend_policy: BlendPolicy::HardThreshold,
            fit_mode: None,
            output_format: None,
            compositor: None,
            pool_capacity: 8,
            passthrough_bypass: true,
            stats_interval: 30,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_frame_rate(self.frame_rate)?;
        validate_threshold(self.confidence_threshold)?;
        if self.detection_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::ThresholdOutOfRange(threshold));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let config = PipelineConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ThresholdOutOfRange(1.5)));

        let config = PipelineConfig {
            detection_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));

        assert!(validate_threshold(f64::NAN).is_err());
        let config = PipelineConfig {
            frame_rate: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::FrameRateOutOfRange(0.0)));
    }
}
