//! Image-sequence frame source.
//!
//! Plays the PNG/JPEG files of a local directory in name order, looping, resized to the
//! requested size. Useful for replaying recorded sessions without a camera.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

use super::{CameraRequest, FrameSource, SourceStats};
use crate::frame::CameraFrame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    device: String,
    files: Vec<PathBuf>,
    request: Option<CameraRequest>,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("image sequence directory must not be empty"));
        }
        Ok(Self {
            device: format!("dir://{}", dir.display()),
            dir,
            files: Vec::new(),
            request: None,
            frame_count: 0,
            last_error: None,
        })
    }

    /// Image files in the directory, sorted by name.
    pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("read image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn load(&self, path: &Path, request: &CameraRequest) -> Result<CameraFrame> {
        let image = image::open(path)
            .with_context(|| format!("decode image {}", path.display()))?
            .to_rgb8();
        let image = if image.width() != request.width || image.height() != request.height {
            image::imageops::resize(&image, request.width, request.height, FilterType::Triangle)
        } else {
            image
        };
        let (width, height) = image.dimensions();
        Ok(
            CameraFrame::from_rgb(image.into_raw(), width, height, self.frame_count)?
                .with_facing(request.facing),
        )
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.device
    }

    fn open(&mut self, request: &CameraRequest) -> Result<()> {
        if request.width == 0 || request.height == 0 {
            return Err(anyhow!(
                "camera request must be non-empty, got {}x{}",
                request.width,
                request.height
            ));
        }
        let files = Self::list_images(&self.dir)?;
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.dir.display()));
        }
        log::info!(
            "ImageSequenceSource: opened {} ({} images, {}x{})",
            self.dir.display(),
            files.len(),
            request.width,
            request.height
        );
        self.files = files;
        self.request = Some(request.clone());
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CameraFrame> {
        let request = self
            .request
            .clone()
            .ok_or_else(|| anyhow!("image sequence {} not open", self.dir.display()))?;
        let index = (self.frame_count % self.files.len() as u64) as usize;
        self.frame_count += 1;
        let path = self.files[index].clone();
        self.load(&path, &request).map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })
    }

    fn close(&mut self) {
        if self.request.take().is_some() {
            log::info!("ImageSequenceSource: closed {}", self.dir.display());
        }
        self.files.clear();
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::CameraFacing;

    fn write_png(dir: &Path, name: &str, value: u8) {
        let img = image::RgbImage::from_pixel(8, 6, image::Rgb([value, value, value]));
        img.save(dir.join(name)).unwrap();
    }

    fn request(width: u32, height: u32) -> CameraRequest {
        CameraRequest {
            facing: CameraFacing::Rear,
            width,
            height,
            target_fps: 0,
        }
    }

    #[test]
    fn plays_images_in_order_and_loops() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "b.png", 200);
        write_png(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut source = ImageSequenceSource::new(dir.path())?;
        source.open(&request(8, 6))?;
        let first = source.next_frame()?;
        let second = source.next_frame()?;
        let third = source.next_frame()?;
        assert_eq!(first.view().rgb_at(0, 0), [10, 10, 10]);
        assert_eq!(second.view().rgb_at(0, 0), [200, 200, 200]);
        assert_eq!(third.view().rgb_at(0, 0), [10, 10, 10]);
        assert_eq!(first.facing, Some(CameraFacing::Rear));
        Ok(())
    }

    #[test]
    fn resizes_to_request() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write_png(dir.path(), "a.png", 50);
        let mut source = ImageSequenceSource::new(dir.path())?;
        source.open(&request(16, 12))?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width, frame.height), (16, 12));
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageSequenceSource::new(dir.path())?;
        assert!(source.open(&request(8, 6)).is_err());
        Ok(())
    }
}
