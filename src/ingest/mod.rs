//! Frame sources.
//!
//! This module provides different sources for camera frames:
//! - Synthetic camera (`stub://…`, tests and demos)
//! - Image sequences from a local directory (`dir://…` or a directory path)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! All sources produce RGB24 `CameraFrame` instances at the requested size (V4L2 devices
//! may negotiate a different size). Sources are pulled synchronously; `CameraInput`
//! drives them on a capture thread.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod sequence;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::frame::CameraFrame;

pub use sequence::ImageSequenceSource;
pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

/// Which way the camera points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Front,
    Rear,
}

impl std::str::FromStr for CameraFacing {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(CameraFacing::Front),
            "rear" | "back" | "environment" => Ok(CameraFacing::Rear),
            other => Err(anyhow!("unknown camera facing '{}' (expected front or rear)", other)),
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraFacing::Front => write!(f, "front"),
            CameraFacing::Rear => write!(f, "rear"),
        }
    }
}

/// What the camera is asked to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraRequest {
    pub facing: CameraFacing,
    /// Target width; normally the presentation surface width.
    pub width: u32,
    /// Target height; normally the presentation surface height.
    pub height: u32,
    /// Frames per second. 0 = as fast as the source delivers.
    pub target_fps: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Front,
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// A pull-based camera.
pub trait FrameSource: Send {
    /// Device identifier, for logs.
    fn name(&self) -> &str;

    /// Acquire the device and configure it for `request`.
    fn open(&mut self, request: &CameraRequest) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<CameraFrame>;

    /// Release the device. Must be safe to call when not open.
    fn close(&mut self);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Device strings for each facing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDevices {
    pub front: String,
    pub rear: String,
}

impl Default for CameraDevices {
    fn default() -> Self {
        Self {
            front: "stub://front_camera".to_string(),
            rear: "stub://rear_camera".to_string(),
        }
    }
}

impl CameraDevices {
    pub fn device_for(&self, facing: CameraFacing) -> &str {
        match facing {
            CameraFacing::Front => &self.front,
            CameraFacing::Rear => &self.rear,
        }
    }
}

/// Build a frame source for a device string.
///
/// - `stub://…` → synthetic camera
/// - `dir://path` or an existing directory → image sequence
/// - anything else → V4L2 device node (feature: ingest-v4l2)
pub fn open_source(device: &str) -> Result<Box<dyn FrameSource>> {
    let device = device.trim();
    if device.is_empty() {
        return Err(anyhow!("camera device must not be empty"));
    }
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(device)));
    }
    if let Some(path) = device.strip_prefix("dir://") {
        return Ok(Box::new(ImageSequenceSource::new(path)?));
    }
    if Path::new(device).is_dir() {
        return Ok(Box::new(ImageSequenceSource::new(device)?));
    }
    if device.contains("://") {
        return Err(anyhow!(
            "unsupported camera device '{}' (expected stub://, dir:// or a device path)",
            device
        ));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(device)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "camera device '{}' requires the ingest-v4l2 feature",
            device
        ))
    }
}
