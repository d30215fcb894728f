//! Synthetic camera.
//!
//! Generates a bright ellipse ("face") drifting over a dark gradient, so the stub
//! landmark backend has something to find. `stub://blank` produces the gradient only.

use anyhow::{anyhow, Result};

use super::{CameraRequest, FrameSource, SourceStats};
use crate::frame::{rgb_len, CameraFrame};

const FACE_RGB: [f32; 3] = [232.0, 198.0, 176.0];

pub struct SyntheticCamera {
    device: String,
    request: Option<CameraRequest>,
    frame_count: u64,
    draw_face: bool,
}

impl SyntheticCamera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            request: None,
            frame_count: 0,
            draw_face: !device.ends_with("/blank"),
        }
    }

    fn generate_pixels(&self, width: u32, height: u32) -> Result<Vec<u8>> {
        let mut pixels = vec![0u8; rgb_len(width, height)?];
        let t = self.frame_count as f32;

        // Face drifts slowly left/right and up/down so consecutive frames differ.
        let cx = width as f32 * (0.5 + 0.12 * (t * 0.05).sin());
        let cy = height as f32 * (0.5 + 0.06 * (t * 0.03).cos());
        let ry = height as f32 * 0.3;
        let rx = ry * 0.75;

        for y in 0..height as usize {
            let shade = 20.0 + 60.0 * y as f32 / height.max(1) as f32;
            for x in 0..width as usize {
                let offset = (y * width as usize + x) * 3;
                let dx = (x as f32 - cx) / rx;
                let dy = (y as f32 - cy) / ry;
                let inside = self.draw_face && dx * dx + dy * dy <= 1.0;
                for c in 0..3 {
                    let v = if inside { FACE_RGB[c] } else { shade };
                    pixels[offset + c] = v as u8;
                }
            }
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.device
    }

    /// Synthetic cameras are always available.
    fn open(&mut self, request: &CameraRequest) -> Result<()> {
        if request.width == 0 || request.height == 0 {
            return Err(anyhow!(
                "camera request must be non-empty, got {}x{}",
                request.width,
                request.height
            ));
        }
        log::info!(
            "SyntheticCamera: opened {} ({}x{}, {})",
            self.device,
            request.width,
            request.height,
            request.facing
        );
        self.request = Some(request.clone());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CameraFrame> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| anyhow!("synthetic camera {} not open", self.device))?;
        let (width, height, facing) = (request.width, request.height, request.facing);

        self.frame_count += 1;
        let pixels = self.generate_pixels(width, height)?;
        Ok(CameraFrame::from_rgb(pixels, width, height, self.frame_count)?.with_facing(facing))
    }

    fn close(&mut self) {
        if self.request.take().is_some() {
            log::info!("SyntheticCamera: closed {}", self.device);
        }
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}
