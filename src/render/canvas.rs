use image::{Rgb, RgbImage};

use crate::detect::NormalizedLandmark;
use crate::frame::FrameView;

pub type Color = [u8; 3];

/// RGB raster the renderer draws into.
#[derive(Clone, Debug)]
pub struct Canvas {
    image: RgbImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn clear(&mut self, color: Color) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgb(color);
        }
    }

    /// Copy a frame onto the whole canvas, nearest-neighbour scaled.
    pub fn blit_frame(&mut self, view: &FrameView<'_>) {
        let (cw, ch) = self.image.dimensions();
        if cw == 0 || ch == 0 || view.width() == 0 || view.height() == 0 {
            return;
        }
        for y in 0..ch {
            let sy = (y as u64 * view.height() as u64 / ch as u64) as i64;
            for x in 0..cw {
                let sx = (x as u64 * view.width() as u64 / cw as u64) as i64;
                self.image.put_pixel(x, y, Rgb(view.rgb_at(sx, sy)));
            }
        }
    }

    pub fn set_pixel(&mut self, x: i64, y: i64, color: Color) {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return;
        }
        self.image.put_pixel(x as u32, y as u32, Rgb(color));
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x < self.width() && y < self.height() {
            Some(self.image.get_pixel(x, y).0)
        } else {
            None
        }
    }

    /// Bresenham line; pixels outside the canvas are clipped.
    pub fn draw_line(&mut self, from: (i64, i64), to: (i64, i64), color: Color) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.set_pixel(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    pub fn draw_dot(&mut self, center: (i64, i64), radius: i64, color: Color) {
        let r2 = radius * radius;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= r2 {
                    self.set_pixel(center.0 + dx, center.1 + dy, color);
                }
            }
        }
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: Color) {
        let x_end = x.saturating_add(width).min(self.width());
        let y_end = y.saturating_add(height).min(self.height());
        for py in y..y_end {
            for px in x..x_end {
                self.image.put_pixel(px, py, Rgb(color));
            }
        }
    }

    /// Map a normalized landmark to canvas pixel coordinates.
    pub fn to_pixel(&self, landmark: &NormalizedLandmark) -> (i64, i64) {
        (
            (landmark.x * self.width() as f32).round() as i64,
            (landmark.y * self.height() as f32).round() as i64,
        )
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}
