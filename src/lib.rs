//! Real-time frame pipeline for video calls: rate governing, appearance
//! filters, landmark and segmentation caching, and background replacement.

pub mod capture;
pub mod compositor;
pub mod detection;
pub mod error;
pub mod filters;
pub mod flight;
pub mod format;
pub mod frame;
pub mod governor;
pub mod output;
pub mod pipeline;
#[cfg(feature = "onnx")]
pub mod segmentation;
pub mod sink;
pub mod stats;

pub use compositor::{BackgroundImage, BlendPolicy, FitMode, SegmentationCompositor};
pub use detection::{LandmarkDetector, Mask, Point2, Segmenter};
pub use error::{ConfigError, FormatError, PipelineError, Result};
pub use filters::FilterChain;
pub use format::CanonicalBuffer;
pub use frame::{FourCc, Frame, PixelFormat, Plane, Rotation, Timestamp};
pub use output::FrameConsumer;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, Submission};
