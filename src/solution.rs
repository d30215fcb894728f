//! Face mesh solution.
//!
//! `FaceMesh` owns the selected landmark backend and the per-stream tracking state.
//! In streaming mode the faces found on one frame seed the search region for the next;
//! in static-image mode every frame is searched from scratch.

use anyhow::{anyhow, Result};

use crate::detect::{
    select_backend, BackendRegistry, BackendSelection, ExecutionTarget, FaceLandmarks,
    FaceMeshOptions, FaceMeshResult, NormalizedRect, RawFace, SharedBackend,
};
use crate::frame::{CameraFrame, FrameView};

/// Tracked faces are re-searched in a box this much larger than their landmarks.
const TRACKING_ROI_SCALE: f32 = 1.5;
/// Faces overlapping more than this are treated as the same face.
const DUPLICATE_IOU: f32 = 0.5;

/// A result paired with the frame it was computed from.
#[derive(Debug)]
pub struct RenderData {
    pub frame: CameraFrame,
    pub result: FaceMeshResult,
}

pub struct FaceMesh {
    options: FaceMeshOptions,
    backend: SharedBackend,
    backend_name: String,
    target: ExecutionTarget,
    /// Search regions carried over from the previous frame (streaming mode only).
    tracked: Vec<NormalizedRect>,
    frames_processed: u64,
}

impl FaceMesh {
    /// Validate options, select a backend from the registry and warm it up.
    pub fn new(options: FaceMeshOptions, registry: &BackendRegistry) -> Result<Self> {
        options.validate()?;
        let selected = select_backend(registry, &options, BackendSelection::from_options(&options))?;
        {
            let mut backend = selected
                .backend
                .lock()
                .map_err(|_| anyhow!("backend lock poisoned"))?;
            backend.warm_up()?;
        }
        log::info!(
            "FaceMesh: backend={} target={:?} static_image_mode={} refine_landmarks={}",
            selected.name,
            selected.target,
            options.static_image_mode,
            options.refine_landmarks
        );
        Ok(Self {
            options,
            backend: selected.backend,
            backend_name: selected.name,
            target: selected.target,
            tracked: Vec::new(),
            frames_processed: 0,
        })
    }

    pub fn options(&self) -> &FaceMeshOptions {
        &self.options
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn execution_target(&self) -> ExecutionTarget {
        self.target
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Regions that will be searched first on the next frame.
    pub fn tracked_regions(&self) -> &[NormalizedRect] {
        &self.tracked
    }

    /// Drop tracking state, e.g. when the camera restarts.
    pub fn reset(&mut self) {
        self.tracked.clear();
    }

    /// Run inference on a frame and pair the result with it.
    ///
    /// On error the frame is released here.
    pub fn send(&mut self, frame: CameraFrame) -> Result<RenderData> {
        let result = self.process(&frame.view())?;
        Ok(RenderData { frame, result })
    }

    /// Run inference on a borrowed frame.
    pub fn process(&mut self, view: &FrameView<'_>) -> Result<FaceMeshResult> {
        if view.width() == 0 || view.height() == 0 {
            return Err(anyhow!("cannot process an empty frame"));
        }

        let searches: Vec<Option<NormalizedRect>> =
            if self.options.static_image_mode || self.tracked.is_empty() {
                vec![None]
            } else {
                self.tracked.iter().copied().map(Some).collect()
            };
        let was_tracking = searches.iter().any(Option::is_some);

        let mut faces: Vec<FaceLandmarks> = Vec::new();
        for roi in &searches {
            let raw = self.detect(view, roi.as_ref())?;
            self.merge(&mut faces, raw)?;
        }

        // Lost a tracked face, or room for more: search the whole frame as well.
        if was_tracking && faces.len() < self.options.max_num_faces {
            let raw = self.detect(view, None)?;
            self.merge(&mut faces, raw)?;
        }

        faces.sort_by(|a, b| b.score.total_cmp(&a.score));
        faces.truncate(self.options.max_num_faces);

        self.tracked = if self.options.static_image_mode {
            Vec::new()
        } else {
            faces
                .iter()
                .filter(|face| face.score >= self.options.min_tracking_confidence)
                .map(|face| {
                    face.bounds
                        .squared(view.width(), view.height())
                        .scaled(TRACKING_ROI_SCALE)
                })
                .collect()
        };
        self.frames_processed += 1;

        Ok(FaceMeshResult {
            sequence: view.sequence(),
            width: view.width(),
            height: view.height(),
            faces,
            backend: self.backend_name.clone(),
        })
    }

    fn detect(&self, view: &FrameView<'_>, roi: Option<&NormalizedRect>) -> Result<Vec<RawFace>> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        backend.detect(view, roi, &self.options)
    }

    /// Validate backend output and add faces that are confident and not duplicates.
    fn merge(&self, faces: &mut Vec<FaceLandmarks>, raw: Vec<RawFace>) -> Result<()> {
        let expected = self.options.landmarks_per_face();
        for face in raw {
            if face.landmarks.len() != expected {
                return Err(anyhow!(
                    "backend {} returned {} landmarks, expected {}",
                    self.backend_name,
                    face.landmarks.len(),
                    expected
                ));
            }
            if face.score < self.options.min_detection_confidence {
                continue;
            }
            let Some(bounds) = NormalizedRect::enclosing(&face.landmarks) else {
                continue;
            };
            if faces
                .iter()
                .any(|existing| existing.bounds.iou(&bounds) > DUPLICATE_IOU)
            {
                continue;
            }
            faces.push(FaceLandmarks {
                landmarks: face.landmarks,
                score: face.score,
                bounds,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{
        Capability, LandmarkBackend, NormalizedLandmark, StubBackend, NUM_FACE_LANDMARKS,
    };
    use std::sync::{Arc, Mutex};

    fn ellipse_frame(sequence: u64) -> CameraFrame {
        let (width, height) = (120u32, 90u32);
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let dx = (x as f32 - 60.0) / 22.0;
                let dy = (y as f32 - 45.0) / 30.0;
                let v = if dx * dx + dy * dy <= 1.0 { 220 } else { 20 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        CameraFrame::from_rgb(data, width, height, sequence).unwrap()
    }

    fn stub_registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry
    }

    /// Records every ROI it is asked to search; returns one fixed face.
    struct RecordingBackend {
        rois: Arc<Mutex<Vec<Option<NormalizedRect>>>>,
        landmarks: usize,
        score: f32,
    }

    impl LandmarkBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn supports(&self, capability: Capability) -> bool {
            matches!(capability, Capability::FaceLandmarks)
        }

        fn detect(
            &mut self,
            _view: &FrameView<'_>,
            roi: Option<&NormalizedRect>,
            _options: &FaceMeshOptions,
        ) -> Result<Vec<RawFace>> {
            self.rois.lock().unwrap().push(roi.copied());
            let landmarks = (0..self.landmarks)
                .map(|i| {
                    let t = i as f32 / self.landmarks as f32;
                    NormalizedLandmark::new(0.4 + 0.2 * t, 0.4 + 0.2 * (1.0 - t), 0.0)
                })
                .collect();
            Ok(vec![RawFace {
                landmarks,
                score: self.score,
            }])
        }
    }

    fn recording_mesh(
        options: FaceMeshOptions,
        landmarks: usize,
        score: f32,
    ) -> (FaceMesh, Arc<Mutex<Vec<Option<NormalizedRect>>>>) {
        let rois = Arc::new(Mutex::new(Vec::new()));
        let mut registry = BackendRegistry::new();
        registry.register(RecordingBackend {
            rois: rois.clone(),
            landmarks,
            score,
        });
        (FaceMesh::new(options, &registry).unwrap(), rois)
    }

    #[test]
    fn send_pairs_result_with_frame() -> Result<()> {
        let mut mesh = FaceMesh::new(FaceMeshOptions::default(), &stub_registry())?;
        let out = mesh.send(ellipse_frame(42))?;
        assert_eq!(out.frame.sequence, 42);
        assert_eq!(out.result.sequence, 42);
        assert_eq!(out.result.faces.len(), 1);
        assert_eq!(out.result.faces[0].landmarks.len(), NUM_FACE_LANDMARKS);
        assert_eq!(out.result.backend, "stub");
        Ok(())
    }

    #[test]
    fn streaming_mode_tracks_previous_face() -> Result<()> {
        let (mut mesh, rois) = recording_mesh(FaceMeshOptions::default(), NUM_FACE_LANDMARKS, 0.9);
        mesh.process(&ellipse_frame(1).view())?;
        assert_eq!(mesh.tracked_regions().len(), 1);
        mesh.process(&ellipse_frame(2).view())?;

        let rois = rois.lock().unwrap();
        assert_eq!(rois[0], None);
        assert!(rois[1].is_some(), "second frame should search the tracked ROI");
        Ok(())
    }

    #[test]
    fn static_mode_never_tracks() -> Result<()> {
        let options = FaceMeshOptions::builder().static_image_mode(true).build()?;
        let (mut mesh, rois) = recording_mesh(options, NUM_FACE_LANDMARKS, 0.9);
        mesh.process(&ellipse_frame(1).view())?;
        mesh.process(&ellipse_frame(2).view())?;
        assert!(mesh.tracked_regions().is_empty());
        assert!(rois.lock().unwrap().iter().all(Option::is_none));
        Ok(())
    }

    #[test]
    fn low_confidence_faces_are_dropped() -> Result<()> {
        let (mut mesh, _) = recording_mesh(FaceMeshOptions::default(), NUM_FACE_LANDMARKS, 0.2);
        let result = mesh.process(&ellipse_frame(1).view())?;
        assert!(result.is_empty());
        assert!(mesh.tracked_regions().is_empty());
        Ok(())
    }

    #[test]
    fn wrong_landmark_count_is_an_error() {
        let (mut mesh, _) = recording_mesh(FaceMeshOptions::default(), 10, 0.9);
        let err = mesh.process(&ellipse_frame(1).view()).unwrap_err();
        assert!(err.to_string().contains("landmarks"));
    }

    #[test]
    fn reset_clears_tracking() -> Result<()> {
        let (mut mesh, _) = recording_mesh(FaceMeshOptions::default(), NUM_FACE_LANDMARKS, 0.9);
        mesh.process(&ellipse_frame(1).view())?;
        mesh.reset();
        assert!(mesh.tracked_regions().is_empty());
        Ok(())
    }
}
