//! Camera frame ownership.
//!
//! - `CameraFrame`: owned RGB24 pixel buffer produced by a frame source. Not `Clone`.
//!   Moving it into the pipeline is the hand-off; dropping it releases the buffer.
//! - `FrameView`: borrowed read-only view handed to landmark backends.
//!
//! Frames are released (and zeroized) as soon as the pipeline is done with them.
//! Nothing in the crate keeps a frame after its result has been drawn.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use crate::detect::NormalizedRect;
use crate::ingest::CameraFacing;

/// Frames are always normalized to packed RGB24 at capture time.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// CameraFrame: owned pixel buffer
// ----------------------------------------------------------------------------

/// Owned camera frame. Explicitly NOT `Clone`: each frame has exactly one owner.
pub struct CameraFrame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Per-source monotonically increasing sequence number.
    pub sequence: u64,

    /// Which camera produced this frame, when known.
    pub facing: Option<CameraFacing>,

    captured_at: Instant,
}

impl CameraFrame {
    /// Wrap an RGB24 buffer. The buffer length must be exactly `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            facing: None,
            captured_at: Instant::now(),
        })
    }

    pub fn with_facing(mut self, facing: CameraFacing) -> Self {
        self.facing = Some(facing);
        self
    }

    /// Read-only view for inference.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    /// Time since the frame was captured.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

}

impl std::fmt::Debug for CameraFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("facing", &self.facing)
            .finish_non_exhaustive()
    }
}

impl Drop for CameraFrame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Byte length of an RGB24 frame, with overflow checking.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// FrameView: what backends receive
// ----------------------------------------------------------------------------

/// Borrowed view of a frame. Backends may read pixels but cannot keep the frame.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a CameraFrame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    /// RGB triple at pixel coordinates, clamped to the frame.
    pub fn rgb_at(&self, x: i64, y: i64) -> [u8; 3] {
        let w = self.frame.width as i64;
        let h = self.frame.height as i64;
        let x = x.clamp(0, w - 1) as usize;
        let y = y.clamp(0, h - 1) as usize;
        let offset = (y * w as usize + x) * BYTES_PER_PIXEL;
        [
            self.frame.data[offset],
            self.frame.data[offset + 1],
            self.frame.data[offset + 2],
        ]
    }

    /// Luma of a pixel (BT.601 weights).
    pub fn luma_at(&self, x: i64, y: i64) -> f32 {
        let [r, g, b] = self.rgb_at(x, y);
        0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
    }

    /// Nearest-neighbour resample of a normalized region into an `out_w x out_h` RGB24 buffer.
    ///
    /// Regions extending past the frame edge are clamped to the border pixels.
    pub fn resample_region(&self, roi: &NormalizedRect, out_w: u32, out_h: u32) -> Result<Vec<u8>> {
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(anyhow!("cannot resample an empty frame"));
        }
        if out_w == 0 || out_h == 0 {
            return Err(anyhow!("resample target must be non-empty"));
        }
        let mut out = vec![0u8; rgb_len(out_w, out_h)?];
        let fw = self.frame.width as f32;
        let fh = self.frame.height as f32;
        let left = roi.x_min() * fw;
        let top = roi.y_min() * fh;
        let step_x = roi.width * fw / out_w as f32;
        let step_y = roi.height * fh / out_h as f32;
        for j in 0..out_h as usize {
            let sy = (top + (j as f32 + 0.5) * step_y).floor() as i64;
            for i in 0..out_w as usize {
                let sx = (left + (i as f32 + 0.5) * step_x).floor() as i64;
                let offset = (j * out_w as usize + i) * BYTES_PER_PIXEL;
                out[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&self.rgb_at(sx, sy));
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
