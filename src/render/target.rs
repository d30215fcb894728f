use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::canvas::Canvas;

/// Where drawn canvases end up.
pub trait RenderTarget: Send {
    fn present(&mut self, canvas: &Canvas, sequence: u64) -> Result<()>;
}

/// Keeps the last presented canvas in memory. Clones share the same slot.
#[derive(Clone, Debug, Default)]
pub struct MemoryTarget {
    inner: Arc<Mutex<MemoryTargetState>>,
}

#[derive(Debug, Default)]
struct MemoryTargetState {
    last: Option<RgbImage>,
    last_sequence: Option<u64>,
    presented: u64,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.inner.lock().map(|s| s.presented).unwrap_or(0)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.inner.lock().ok().and_then(|s| s.last_sequence)
    }

    pub fn last_image(&self) -> Option<RgbImage> {
        self.inner.lock().ok().and_then(|s| s.last.clone())
    }
}

impl RenderTarget for MemoryTarget {
    fn present(&mut self, canvas: &Canvas, sequence: u64) -> Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory target lock poisoned"))?;
        state.last = Some(canvas.image().clone());
        state.last_sequence = Some(sequence);
        state.presented += 1;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Png,
    Jpeg,
}

impl SnapshotFormat {
    fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Png => "png",
            SnapshotFormat::Jpeg => "jpg",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            SnapshotFormat::Png => ImageFormat::Png,
            SnapshotFormat::Jpeg => ImageFormat::Jpeg,
        }
    }
}

impl std::str::FromStr for SnapshotFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(SnapshotFormat::Png),
            "jpg" | "jpeg" => Ok(SnapshotFormat::Jpeg),
            other => Err(anyhow!("unknown snapshot format '{}' (expected png or jpeg)", other)),
        }
    }
}

/// Writes every Nth presented canvas to a directory.
#[derive(Debug)]
pub struct SnapshotTarget {
    dir: PathBuf,
    every_nth: u64,
    format: SnapshotFormat,
    presented: u64,
    written: u64,
}

impl SnapshotTarget {
    pub fn new<P: AsRef<Path>>(dir: P, every_nth: u64, format: SnapshotFormat) -> Result<Self> {
        if every_nth == 0 {
            return Err(anyhow!("snapshot interval must be at least 1"));
        }
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
        Ok(Self {
            dir,
            every_nth,
            format,
            presented: 0,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir
            .join(format!("frame_{:06}.{}", sequence, self.format.extension()))
    }
}

impl RenderTarget for SnapshotTarget {
    fn present(&mut self, canvas: &Canvas, sequence: u64) -> Result<()> {
        self.presented += 1;
        if (self.presented - 1) % self.every_nth != 0 {
            return Ok(());
        }
        let path = self.path_for(sequence);
        canvas
            .image()
            .save_with_format(&path, self.format.image_format())
            .with_context(|| format!("write snapshot {}", path.display()))?;
        self.written += 1;
        log::debug!("snapshot written: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_target_clones_share_state() -> Result<()> {
        let target = MemoryTarget::new();
        let mut writer = target.clone();
        writer.present(&Canvas::new(4, 4), 7)?;
        assert_eq!(target.presented(), 1);
        assert_eq!(target.last_sequence(), Some(7));
        assert_eq!(target.last_image().map(|img| img.dimensions()), Some((4, 4)));
        Ok(())
    }

    #[test]
    fn snapshot_writes_every_nth() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut target = SnapshotTarget::new(dir.path(), 2, SnapshotFormat::Png)?;
        for sequence in 1..=5 {
            target.present(&Canvas::new(4, 4), sequence)?;
        }
        assert_eq!(target.written(), 3);
        assert!(target.path_for(1).exists());
        assert!(!target.path_for(2).exists());
        assert!(target.path_for(5).exists());
        Ok(())
    }

    #[test]
    fn snapshot_rejects_zero_interval() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(SnapshotTarget::new(dir.path(), 0, SnapshotFormat::Jpeg).is_err());
        assert_eq!("JPG".parse::<SnapshotFormat>()?, SnapshotFormat::Jpeg);
        Ok(())
    }
}
