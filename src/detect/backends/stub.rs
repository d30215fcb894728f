use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::{Capability, LandmarkBackend};
use crate::detect::connections::{
    ordered_indices, Connection, FACE_OVAL, LEFT_EYE, LEFT_EYEBROW, LEFT_IRIS, LEFT_IRIS_CENTER,
    LIPS, RIGHT_EYE, RIGHT_EYEBROW, RIGHT_IRIS, RIGHT_IRIS_CENTER,
};
use crate::detect::options::FaceMeshOptions;
use crate::detect::result::{NormalizedLandmark, NormalizedRect, RawFace};
use crate::frame::FrameView;

/// Samples per axis when scanning for the bright face blob.
const GRID: u32 = 64;
/// Minimum luma spread between the blob and the background.
const MIN_CONTRAST: f32 = 40.0;
/// Fill ratio of an ellipse inside its bounding box.
const ELLIPSE_FILL: f32 = std::f32::consts::FRAC_PI_4;

/// Stub backend for tests and demos.
///
/// Treats the brightest blob in the search region as the face and lays a fixed mesh
/// template over its bounds. Works with the synthetic camera, which draws a bright
/// ellipse over a dark gradient. Finds at most one face.
pub struct StubBackend {
    /// Digest of the last frame + ROI, and the faces computed for it.
    last: Option<([u8; 32], Vec<RawFace>)>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LandmarkBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(
            capability,
            Capability::FaceLandmarks | Capability::IrisRefinement
        )
    }

    fn detect(
        &mut self,
        view: &FrameView<'_>,
        roi: Option<&NormalizedRect>,
        options: &FaceMeshOptions,
    ) -> Result<Vec<RawFace>> {
        if view.width() == 0 || view.height() == 0 {
            return Err(anyhow!("stub backend received an empty frame"));
        }

        let digest = frame_digest(view, roi, options);
        if let Some((prev, faces)) = &self.last {
            if *prev == digest {
                return Ok(faces.clone());
            }
        }

        let region = roi.copied().unwrap_or_else(NormalizedRect::full);
        let faces = match find_blob(view, &region) {
            Some((bounds, score)) => vec![RawFace {
                landmarks: template_landmarks(&bounds, options.landmarks_per_face()),
                score,
            }],
            None => Vec::new(),
        };

        self.last = Some((digest, faces.clone()));
        Ok(faces)
    }
}

fn frame_digest(
    view: &FrameView<'_>,
    roi: Option<&NormalizedRect>,
    options: &FaceMeshOptions,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(view.width().to_le_bytes());
    hasher.update(view.height().to_le_bytes());
    hasher.update(view.pixels());
    if let Some(roi) = roi {
        for v in [roi.x_center, roi.y_center, roi.width, roi.height] {
            hasher.update(v.to_le_bytes());
        }
    }
    hasher.update([options.refine_landmarks as u8]);
    hasher.finalize().into()
}

/// Bounds (full-frame normalized) and score of the bright blob inside `region`.
fn find_blob(view: &FrameView<'_>, region: &NormalizedRect) -> Option<(NormalizedRect, f32)> {
    let fw = view.width() as f32;
    let fh = view.height() as f32;
    let mut samples = Vec::with_capacity((GRID * GRID) as usize);
    for j in 0..GRID {
        for i in 0..GRID {
            let nx = region.x_min() + (i as f32 + 0.5) / GRID as f32 * region.width;
            let ny = region.y_min() + (j as f32 + 0.5) / GRID as f32 * region.height;
            if !(0.0..1.0).contains(&nx) || !(0.0..1.0).contains(&ny) {
                continue;
            }
            let luma = view.luma_at((nx * fw) as i64, (ny * fh) as i64);
            samples.push((nx, ny, luma));
        }
    }
    if samples.is_empty() {
        return None;
    }

    let mean = samples.iter().map(|s| s.2).sum::<f32>() / samples.len() as f32;
    let max = samples.iter().map(|s| s.2).fold(f32::MIN, f32::max);
    if max - mean < MIN_CONTRAST {
        return None;
    }
    let threshold = (mean + max) / 2.0;

    let bright: Vec<NormalizedLandmark> = samples
        .iter()
        .filter(|s| s.2 >= threshold)
        .map(|s| NormalizedLandmark::new(s.0, s.1, 0.0))
        .collect();
    let bounds = NormalizedRect::enclosing(&bright)?;

    let cell_w = region.width / GRID as f32;
    let cell_h = region.height / GRID as f32;
    let cells_in_box = ((bounds.width / cell_w + 1.0) * (bounds.height / cell_h + 1.0)).max(1.0);
    let fill = bright.len() as f32 / cells_in_box;

    let contrast_score = ((max - mean) / 128.0).clamp(0.0, 1.0);
    let shape_score = (1.0 - (fill - ELLIPSE_FILL).abs() * 2.0).clamp(0.0, 1.0);
    Some((bounds, contrast_score * shape_score))
}

/// Region of the template, in face-box units (`-1..1` on both axes).
struct TemplateRegion {
    connections: &'static [Connection],
    center: (f32, f32),
    radii: (f32, f32),
}

const TEMPLATE_REGIONS: &[TemplateRegion] = &[
    TemplateRegion {
        connections: FACE_OVAL,
        center: (0.0, 0.0),
        radii: (1.0, 1.0),
    },
    TemplateRegion {
        connections: RIGHT_EYE,
        center: (-0.38, -0.18),
        radii: (0.2, 0.08),
    },
    TemplateRegion {
        connections: LEFT_EYE,
        center: (0.38, -0.18),
        radii: (0.2, 0.08),
    },
    TemplateRegion {
        connections: RIGHT_EYEBROW,
        center: (-0.38, -0.38),
        radii: (0.24, 0.05),
    },
    TemplateRegion {
        connections: LEFT_EYEBROW,
        center: (0.38, -0.38),
        radii: (0.24, 0.05),
    },
    TemplateRegion {
        connections: LIPS,
        center: (0.0, 0.48),
        radii: (0.32, 0.11),
    },
];

const IRIS_REGIONS: &[(&[Connection], usize, (f32, f32))] = &[
    (RIGHT_IRIS, RIGHT_IRIS_CENTER, (-0.38, -0.18)),
    (LEFT_IRIS, LEFT_IRIS_CENTER, (0.38, -0.18)),
];
const IRIS_RADIUS: f32 = 0.06;

/// Spreads `indices` evenly around an ellipse.
fn place_ring(
    local: &mut [(f32, f32)],
    indices: &[usize],
    center: (f32, f32),
    radii: (f32, f32),
) {
    let n = indices.len().max(1) as f32;
    for (k, &index) in indices.iter().enumerate() {
        if let Some(slot) = local.get_mut(index) {
            let theta = std::f32::consts::TAU * k as f32 / n;
            *slot = (
                center.0 + radii.0 * theta.cos(),
                center.1 + radii.1 * theta.sin(),
            );
        }
    }
}

/// Fixed mesh template stretched over `bounds`.
///
/// Contour landmarks sit on ellipses at their facial feature; every other landmark is
/// spread over the face on a sunflower spiral.
fn template_landmarks(bounds: &NormalizedRect, count: usize) -> Vec<NormalizedLandmark> {
    let golden_angle = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    let mut local: Vec<(f32, f32)> = (0..count)
        .map(|i| {
            let r = ((i as f32 + 0.5) / count as f32).sqrt() * 0.9;
            let theta = i as f32 * golden_angle;
            (r * theta.cos(), r * theta.sin())
        })
        .collect();

    for region in TEMPLATE_REGIONS {
        place_ring(
            &mut local,
            ordered_indices(region.connections).as_slice(),
            region.center,
            region.radii,
        );
    }
    for &(connections, center_index, center) in IRIS_REGIONS {
        place_ring(
            &mut local,
            ordered_indices(connections).as_slice(),
            center,
            (IRIS_RADIUS, IRIS_RADIUS),
        );
        if let Some(slot) = local.get_mut(center_index) {
            *slot = center;
        }
    }

    local
        .into_iter()
        .map(|(u, v)| {
            let depth = (1.0 - (u * u + v * v)).max(0.0);
            NormalizedLandmark {
                x: bounds.x_center + u * bounds.width / 2.0,
                y: bounds.y_center + v * bounds.height / 2.0,
                z: -depth * 0.1 * bounds.width,
            }
        })
        .collect()
}
