use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::result::{NUM_FACE_LANDMARKS, NUM_FACE_LANDMARKS_WITH_IRISES};

/// Static configuration of the face mesh solution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceMeshOptions {
    /// Treat every frame as an unrelated image: detect from scratch, never track.
    pub static_image_mode: bool,
    /// Emit iris landmarks (478 per face instead of 468).
    pub refine_landmarks: bool,
    /// Ask for GPU execution. Falls back to CPU when no GPU backend is available.
    pub run_on_gpu: bool,
    pub max_num_faces: usize,
    /// Faces scoring below this are discarded.
    pub min_detection_confidence: f32,
    /// Tracked faces scoring below this are re-detected on the next frame.
    pub min_tracking_confidence: f32,
}

impl Default for FaceMeshOptions {
    fn default() -> Self {
        Self {
            static_image_mode: false,
            refine_landmarks: false,
            run_on_gpu: false,
            max_num_faces: 1,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

impl FaceMeshOptions {
    pub fn builder() -> FaceMeshOptionsBuilder {
        FaceMeshOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Landmarks emitted per face for these options.
    pub fn landmarks_per_face(&self) -> usize {
        if self.refine_landmarks {
            NUM_FACE_LANDMARKS_WITH_IRISES
        } else {
            NUM_FACE_LANDMARKS
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_num_faces == 0 {
            return Err(anyhow!("max_num_faces must be >= 1"));
        }
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Builder for `FaceMeshOptions`. `build` validates.
#[derive(Clone, Debug)]
pub struct FaceMeshOptionsBuilder {
    options: FaceMeshOptions,
}

impl FaceMeshOptionsBuilder {
    pub fn static_image_mode(mut self, enabled: bool) -> Self {
        self.options.static_image_mode = enabled;
        self
    }

    pub fn refine_landmarks(mut self, enabled: bool) -> Self {
        self.options.refine_landmarks = enabled;
        self
    }

    pub fn run_on_gpu(mut self, enabled: bool) -> Self {
        self.options.run_on_gpu = enabled;
        self
    }

    pub fn max_num_faces(mut self, faces: usize) -> Self {
        self.options.max_num_faces = faces;
        self
    }

    pub fn min_detection_confidence(mut self, confidence: f32) -> Self {
        self.options.min_detection_confidence = confidence;
        self
    }

    pub fn min_tracking_confidence(mut self, confidence: f32) -> Self {
        self.options.min_tracking_confidence = confidence;
        self
    }

    pub fn build(self) -> Result<FaceMeshOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() -> Result<()> {
        let opts = FaceMeshOptions::builder()
            .static_image_mode(false)
            .refine_landmarks(true)
            .run_on_gpu(true)
            .build()?;
        assert!(!opts.static_image_mode);
        assert!(opts.refine_landmarks);
        assert!(opts.run_on_gpu);
        assert_eq!(opts.landmarks_per_face(), NUM_FACE_LANDMARKS_WITH_IRISES);
        Ok(())
    }

    #[test]
    fn builder_rejects_bad_values() {
        assert!(FaceMeshOptions::builder().max_num_faces(0).build().is_err());
        assert!(FaceMeshOptions::builder()
            .min_detection_confidence(1.5)
            .build()
            .is_err());
        assert!(FaceMeshOptions::builder()
            .min_tracking_confidence(-0.1)
            .build()
            .is_err());
    }
}
