use crate::detect::connections::{
    Connection, FACE_OVAL, LEFT_EYE, LEFT_EYEBROW, LEFT_IRIS, LEFT_IRIS_CENTER, LIPS, RIGHT_EYE,
    RIGHT_EYEBROW, RIGHT_IRIS, RIGHT_IRIS_CENTER,
};
use crate::detect::{FaceLandmarks, FaceMeshResult};

use super::canvas::{Canvas, Color};

const RIGHT_COLOR: Color = [255, 48, 48];
const LEFT_COLOR: Color = [48, 255, 48];
const OVAL_COLOR: Color = [230, 230, 230];
const LIPS_COLOR: Color = [230, 230, 230];
const POINT_COLOR: Color = [190, 190, 190];

/// Draws face mesh results: contours, and irises when present.
#[derive(Clone, Debug, Default)]
pub struct FaceMeshRenderer {
    draw_points: bool,
}

impl FaceMeshRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also draw every landmark as a single pixel.
    pub fn with_points(mut self, enabled: bool) -> Self {
        self.draw_points = enabled;
        self
    }

    pub fn render(&self, canvas: &mut Canvas, result: &FaceMeshResult) {
        for face in &result.faces {
            self.render_face(canvas, face);
        }
    }

    fn render_face(&self, canvas: &mut Canvas, face: &FaceLandmarks) {
        if self.draw_points {
            for landmark in &face.landmarks {
                let point = canvas.to_pixel(landmark);
                canvas.set_pixel(point.0, point.1, POINT_COLOR);
            }
        }

        draw_connections(canvas, face, FACE_OVAL, OVAL_COLOR);
        draw_connections(canvas, face, LIPS, LIPS_COLOR);
        draw_connections(canvas, face, RIGHT_EYE, RIGHT_COLOR);
        draw_connections(canvas, face, RIGHT_EYEBROW, RIGHT_COLOR);
        draw_connections(canvas, face, LEFT_EYE, LEFT_COLOR);
        draw_connections(canvas, face, LEFT_EYEBROW, LEFT_COLOR);

        if face.has_irises() {
            draw_connections(canvas, face, RIGHT_IRIS, RIGHT_COLOR);
            draw_connections(canvas, face, LEFT_IRIS, LEFT_COLOR);
            for (center, color) in [(RIGHT_IRIS_CENTER, RIGHT_COLOR), (LEFT_IRIS_CENTER, LEFT_COLOR)] {
                if let Some(landmark) = face.landmarks.get(center) {
                    canvas.draw_dot(canvas.to_pixel(landmark), 1, color);
                }
            }
        }
    }
}

fn draw_connections(canvas: &mut Canvas, face: &FaceLandmarks, edges: &[Connection], color: Color) {
    for &(a, b) in edges {
        let (Some(start), Some(end)) = (face.landmarks.get(a), face.landmarks.get(b)) else {
            continue;
        };
        let from = canvas.to_pixel(start);
        let to = canvas.to_pixel(end);
        canvas.draw_line(from, to, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{NormalizedLandmark, NormalizedRect, NUM_FACE_LANDMARKS_WITH_IRISES};

    fn face(count: usize) -> FaceLandmarks {
        // All landmarks on a horizontal line through the middle of the canvas.
        let landmarks = (0..count)
            .map(|i| NormalizedLandmark::new(0.1 + 0.8 * (i % 10) as f32 / 9.0, 0.5, 0.0))
            .collect();
        FaceLandmarks {
            landmarks,
            score: 0.9,
            bounds: NormalizedRect::new(0.5, 0.5, 0.8, 0.1),
        }
    }

    fn result(face: FaceLandmarks) -> FaceMeshResult {
        FaceMeshResult {
            sequence: 1,
            width: 40,
            height: 40,
            faces: vec![face],
            backend: "test".to_string(),
        }
    }

    fn lit_pixels(canvas: &Canvas) -> usize {
        canvas.image().pixels().filter(|p| p.0 != [0, 0, 0]).count()
    }

    #[test]
    fn draws_contours_on_the_face_row() {
        let mut canvas = Canvas::new(40, 40);
        FaceMeshRenderer::new().render(&mut canvas, &result(face(NUM_FACE_LANDMARKS_WITH_IRISES)));
        assert!(lit_pixels(&canvas) > 0);
        assert_eq!(canvas.pixel(20, 5), Some([0, 0, 0]));
    }

    #[test]
    fn empty_result_draws_nothing() {
        let mut canvas = Canvas::new(40, 40);
        let mut empty = result(face(0));
        empty.faces.clear();
        FaceMeshRenderer::new().with_points(true).render(&mut canvas, &empty);
        assert_eq!(lit_pixels(&canvas), 0);
    }

    #[test]
    fn short_landmark_lists_are_tolerated() {
        let mut canvas = Canvas::new(40, 40);
        FaceMeshRenderer::new().render(&mut canvas, &result(face(5)));
    }
}
