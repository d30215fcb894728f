//! V4L2 camera.
//!
//! Captures from a local device node (e.g. /dev/video0) through libv4l with an mmap
//! stream. Frames are converted to RGB24 in-memory.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraFacing, CameraRequest, FrameSource, SourceStats};
use crate::frame::CameraFrame;

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Camera {
    device_path: String,
    state: Option<V4l2State>,
    facing: CameraFacing,
    target_fps: u32,
    format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
            state: None,
            facing: CameraFacing::Front,
            target_fps: 0,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            active_width: 0,
            active_height: 0,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Camera {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn open(&mut self, request: &CameraRequest) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        if request.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.facing = request.facing;
        self.target_fps = request.target_fps;
        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?}, {})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.format,
            self.facing
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CameraFrame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        // The mmap buffer is requeued on the next call; copy it out first.
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let rgb = normalize_to_rgb(&buf, self.active_width, self.active_height, self.format)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Ok(
            CameraFrame::from_rgb(rgb, self.active_width, self.active_height, self.frame_count)?
                .with_facing(self.facing),
        )
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Camera: closed {}", self.device_path);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device_path.clone(),
        }
    }
}
