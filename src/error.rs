use thiserror::Error;

use crate::frame::FourCc;

/// Frame-level format failures: the frame is dropped, the pipeline continues
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(FourCc),

    #[error("malformed buffer: {0}")]
    MalformedBuffer(String),
}

/// Rejected configuration calls; the previous value stays in effect
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("confidence threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("frame rate {0} is outside (0, {max}]", max = crate::pipeline::MAX_FRAME_RATE)]
    FrameRateOutOfRange(f64),

    #[error("detection timeout must be non-zero")]
    ZeroTimeout,

    #[error("unknown filter stage '{0}'")]
    UnknownStage(String),

    #[error("stage '{stage}' has no parameter '{key}'")]
    UnknownParameter { stage: String, key: String },

    #[error("{stage}.{key} = {value} is outside [{min}, {max}]")]
    ParameterOutOfRange {
        stage: String,
        key: String,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("{stage}.{key} takes whole numbers, got {value}")]
    NotIntegral {
        stage: String,
        key: String,
        value: f32,
    },
}

/// Errors surfaced by the pipeline itself
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("failed to allocate {bytes} bytes for a frame buffer")]
    Allocation { bytes: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn {worker} worker thread")]
    Spawn {
        worker: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("processing worker is not running")]
    WorkerUnavailable,
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
