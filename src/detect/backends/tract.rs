#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{Capability, LandmarkBackend};
use crate::detect::options::FaceMeshOptions;
use crate::detect::result::{
    NormalizedLandmark, NormalizedRect, RawFace, NUM_FACE_LANDMARKS, NUM_FACE_LANDMARKS_WITH_IRISES,
};
use crate::frame::FrameView;

/// Input tensor layout expected by the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, 3, H, W]`
    Nchw,
    /// `[1, H, W, 3]`
    Nhwc,
}

/// Tract-based backend for ONNX face landmark models.
///
/// The model takes a square RGB crop in `[0, 1]` and emits `N x 3` landmark coordinates in
/// input pixels (N = 468 or 478) plus a single face-presence logit. Without a tracked ROI
/// the whole frame, squared, is used as the crop.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    layout: TensorLayout,
    model_landmarks: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, layout: TensorLayout) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let shape = match layout {
            TensorLayout::Nchw => tvec!(1, 3, size, size),
            TensorLayout::Nhwc => tvec!(1, size, size, 3),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let mut backend = Self {
            model,
            input_size,
            layout,
            model_landmarks: NUM_FACE_LANDMARKS,
        };
        backend.model_landmarks = backend.probe_landmark_count()?;
        log::info!(
            "TractBackend: loaded {} ({} landmarks, {}x{} input)",
            model_path.display(),
            backend.model_landmarks,
            input_size,
            input_size
        );
        Ok(backend)
    }

    /// Run the model on a blank input to learn how many landmarks it emits.
    fn probe_landmark_count(&self) -> Result<usize> {
        let blank = vec![0u8; (self.input_size * self.input_size * 3) as usize];
        let outputs = self.run(&blank)?;
        let (landmarks, _) = split_outputs(&outputs)?;
        let count = landmarks.len() / 3;
        if count != NUM_FACE_LANDMARKS && count != NUM_FACE_LANDMARKS_WITH_IRISES {
            return Err(anyhow!(
                "model emits {} landmarks; expected {} or {}",
                count,
                NUM_FACE_LANDMARKS,
                NUM_FACE_LANDMARKS_WITH_IRISES
            ));
        }
        Ok(count)
    }

    fn build_input(&self, rgb: &[u8]) -> Tensor {
        let size = self.input_size as usize;
        match self.layout {
            TensorLayout::Nchw => {
                tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
                    rgb[(y * size + x) * 3 + c] as f32 / 255.0
                })
                .into_tensor()
            }
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
                    rgb[(y * size + x) * 3 + c] as f32 / 255.0
                })
                .into_tensor()
            }
        }
    }

    fn run(&self, rgb: &[u8]) -> Result<TVec<TValue>> {
        let input = self.build_input(rgb);
        self.model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")
    }
}

/// Landmark values and face logit from the model outputs.
fn split_outputs(outputs: &TVec<TValue>) -> Result<(Vec<f32>, Option<f32>)> {
    let mut landmarks = None;
    let mut logit = None;
    for output in outputs.iter() {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        if view.len() == 1 {
            logit = view.iter().next().copied();
        } else if view.len() >= NUM_FACE_LANDMARKS * 3 && view.len() % 3 == 0 {
            landmarks.get_or_insert_with(|| view.iter().copied().collect::<Vec<f32>>());
        }
    }
    let landmarks = landmarks.ok_or_else(|| anyhow!("model produced no landmark tensor"))?;
    Ok((landmarks, logit))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl LandmarkBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::FaceLandmarks => true,
            Capability::IrisRefinement => self.model_landmarks >= NUM_FACE_LANDMARKS_WITH_IRISES,
            _ => false,
        }
    }

    fn detect(
        &mut self,
        view: &FrameView<'_>,
        roi: Option<&NormalizedRect>,
        options: &FaceMeshOptions,
    ) -> Result<Vec<RawFace>> {
        let wanted = options.landmarks_per_face();
        if wanted > self.model_landmarks {
            return Err(anyhow!(
                "refined landmarks requested but model only emits {}",
                self.model_landmarks
            ));
        }

        let crop = roi
            .copied()
            .unwrap_or_else(NormalizedRect::full)
            .squared(view.width(), view.height());
        let rgb = view.resample_region(&crop, self.input_size, self.input_size)?;
        let outputs = self.run(&rgb)?;
        let (values, logit) = split_outputs(&outputs)?;

        let score = logit.map(sigmoid).unwrap_or(1.0);
        if score < options.min_detection_confidence {
            return Ok(Vec::new());
        }

        let scale = self.input_size as f32;
        let landmarks = values
            .chunks_exact(3)
            .take(wanted)
            .map(|v| crop.to_frame(NormalizedLandmark::new(v[0] / scale, v[1] / scale, v[2] / scale)))
            .collect();

        Ok(vec![RawFace { landmarks, score }])
    }
}
