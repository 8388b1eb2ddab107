//! ONNX person segmentation backends

mod preprocess;
mod rvm;

pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;

use anyhow::Result;
use std::path::Path;

use crate::detection::Segmenter;

/// Create the default segmenter (RVM)
pub fn create_default_segmenter<P: AsRef<Path>>(model_path: P) -> Result<Box<dyn Segmenter>> {
    let model = RobustVideoMatting::new(model_path)?;
    Ok(Box::new(model))
}
