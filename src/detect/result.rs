use serde::{Deserialize, Serialize};

/// Face mesh landmarks per face without iris refinement.
pub const NUM_FACE_LANDMARKS: usize = 468;

/// Face mesh landmarks per face with iris refinement (468 + 5 per iris).
pub const NUM_FACE_LANDMARKS_WITH_IRISES: usize = 478;

/// A landmark in normalized image coordinates.
///
/// `x` and `y` are in `[0, 1]` relative to the full frame (values slightly outside are
/// allowed near the edges). `z` is depth relative to the face centre, on roughly the
/// same scale as `x`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl NormalizedLandmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Axis-aligned rectangle in normalized coordinates, stored by centre and size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    /// The whole frame.
    pub const fn full() -> Self {
        Self::new(0.5, 0.5, 1.0, 1.0)
    }

    pub fn x_min(&self) -> f32 {
        self.x_center - self.width / 2.0
    }

    pub fn y_min(&self) -> f32 {
        self.y_center - self.height / 2.0
    }

    /// Tight bounds of a landmark set. Returns `None` for an empty set.
    pub fn enclosing(landmarks: &[NormalizedLandmark]) -> Option<Self> {
        let first = landmarks.first()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
        for lm in &landmarks[1..] {
            x0 = x0.min(lm.x);
            y0 = y0.min(lm.y);
            x1 = x1.max(lm.x);
            y1 = y1.max(lm.y);
        }
        Some(Self::new(
            (x0 + x1) / 2.0,
            (y0 + y1) / 2.0,
            x1 - x0,
            y1 - y0,
        ))
    }

    /// Scale around the centre.
    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x_center,
            self.y_center,
            self.width * factor,
            self.height * factor,
        )
    }

    /// Make the rectangle square in pixel space, keeping the larger side.
    pub fn squared(&self, frame_width: u32, frame_height: u32) -> Self {
        let w_px = self.width * frame_width as f32;
        let h_px = self.height * frame_height as f32;
        let side = w_px.max(h_px);
        Self::new(
            self.x_center,
            self.y_center,
            side / frame_width.max(1) as f32,
            side / frame_height.max(1) as f32,
        )
    }

    /// Map a point normalized to this rectangle back to full-frame coordinates.
    pub fn to_frame(&self, local: NormalizedLandmark) -> NormalizedLandmark {
        NormalizedLandmark {
            x: self.x_min() + local.x * self.width,
            y: self.y_min() + local.y * self.height,
            z: local.z * self.width,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another rectangle.
    pub fn iou(&self, other: &NormalizedRect) -> f32 {
        let ix0 = self.x_min().max(other.x_min());
        let iy0 = self.y_min().max(other.y_min());
        let ix1 = (self.x_min() + self.width).min(other.x_min() + other.width);
        let iy1 = (self.y_min() + self.height).min(other.y_min() + other.height);
        let inter = (ix1 - ix0).max(0.0) * (iy1 - iy0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// What a backend returns for one face: landmarks already mapped to full-frame coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFace {
    pub landmarks: Vec<NormalizedLandmark>,
    /// Face presence score in `[0, 1]`.
    pub score: f32,
}

/// One detected face.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub landmarks: Vec<NormalizedLandmark>,
    pub score: f32,
    /// Tight bounds of the landmarks.
    pub bounds: NormalizedRect,
}

impl FaceLandmarks {
    pub fn has_irises(&self) -> bool {
        self.landmarks.len() >= NUM_FACE_LANDMARKS_WITH_IRISES
    }
}

/// Face mesh output for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceMeshResult {
    /// Sequence number of the frame this result was computed from.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceLandmarks>,
    /// Name of the backend that produced the result.
    pub backend: String,
}

impl FaceMeshResult {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}
