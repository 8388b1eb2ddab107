use super::preprocess::Preprocessor;
use crate::detection::{Mask, Segmenter};
use anyhow::{Context, Result};
use image::RgbaImage;
use ndarray::{Array1, ArrayD, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

/// RobustVideoMatting person segmentation
///
/// Recurrent model: hidden states r1-r4 are fed back on every frame for
/// temporally stable mattes, and cleared by `reset_state`.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    /// `None` until the first frame; the model accepts 1x1x1x1 zeros as the initial state
    recurrent: Option<[ArrayD<f32>; 4]>,
    /// Hidden states run at this fraction of the input resolution
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Input is resized to 512x512 with a 0.25 downsample ratio
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_size(model_path, 512, 512)
    }

    pub fn with_input_size<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded, input {}x{}", width, height);

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            recurrent: None,
            downsample_ratio: 0.25,
        })
    }

    fn initial_state() -> [ArrayD<f32>; 4] {
        std::array::from_fn(|_| ArrayD::zeros(IxDyn(&[1, 1, 1, 1])))
    }
}

fn to_array(shape: &[i64], data: &[f32]) -> Result<ArrayD<f32>> {
    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).context("recurrent state does not match its shape")
}

impl Segmenter for RobustVideoMatting {
    fn segment(&mut self, image: &RgbaImage) -> Result<Mask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let src = self.preprocessor.preprocess(image);
        let [r1, r2, r3, r4] = self.recurrent.take().unwrap_or_else(Self::initial_state);

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                "src" => Tensor::from_array(src)?,
                "r1i" => Tensor::from_array(r1)?,
                "r2i" => Tensor::from_array(r2)?,
                "r3i" => Tensor::from_array(r3)?,
                "r4i" => Tensor::from_array(r4)?,
                "downsample_ratio" => Tensor::from_array(Array1::from_elem(1, self.downsample_ratio))?,
            ])
            .context("Failed to run inference")?;
        drop(_infer_span);

        let (shape, alpha) = outputs["pha"].try_extract_tensor::<f32>()?;
        let mask = Preprocessor::matte_to_mask(&shape[..], alpha)?;

        let mut next = Vec::with_capacity(4);
        for name in ["r1o", "r2o", "r3o", "r4o"] {
            let (shape, data) = outputs[name].try_extract_tensor::<f32>()?;
            next.push(to_array(&shape[..], data)?);
        }
        // A failed frame leaves `recurrent` empty, restarting from the initial state
        if let Ok(state) = <[ArrayD<f32>; 4]>::try_from(next) {
            self.recurrent = Some(state);
        }

        Ok(mask)
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.recurrent = None;
    }
}
