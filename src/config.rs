use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{BackendRegistry, FaceMeshOptions, StubBackend};
use crate::ingest::{CameraDevices, CameraFacing};
use crate::permission::PermissionMode;
use crate::pipeline::BackpressurePolicy;
use crate::render::SnapshotFormat;
use crate::session::SessionSettings;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const MAX_FPS: u32 = 240;
const DEFAULT_QUEUE_CAPACITY: usize = 2;
const DEFAULT_REFRESH_HZ: u32 = 30;
const DEFAULT_MODEL_INPUT_SIZE: u32 = 192;
const DEFAULT_MODEL_LAYOUT: &str = "nhwc";
const DEFAULT_SNAPSHOT_EVERY: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct FaceMeshConfigFile {
    camera: Option<CameraConfigFile>,
    face_mesh: Option<FaceMeshOptionsFile>,
    backend: Option<BackendConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    render: Option<RenderConfigFile>,
    permission: Option<PermissionMode>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    front: Option<String>,
    rear: Option<String>,
    facing: Option<CameraFacing>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FaceMeshOptionsFile {
    static_image_mode: Option<bool>,
    refine_landmarks: Option<bool>,
    run_on_gpu: Option<bool>,
    max_num_faces: Option<usize>,
    min_detection_confidence: Option<f32>,
    min_tracking_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    layout: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_capacity: Option<usize>,
    backpressure: Option<BackpressurePolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    refresh_hz: Option<u32>,
    render_input_image: Option<bool>,
    draw_points: Option<bool>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: Option<u64>,
    snapshot_format: Option<SnapshotFormat>,
}

#[derive(Debug, Clone)]
pub struct FaceMeshConfig {
    pub camera: CameraSettings,
    pub options: FaceMeshOptions,
    pub backend: BackendSettings,
    pub pipeline: PipelineSettings,
    pub render: RenderSettings,
    pub permission: PermissionMode,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub devices: CameraDevices,
    pub facing: CameraFacing,
    /// Presentation surface size; the camera is asked for the same size.
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl CameraSettings {
    pub fn device(&self) -> &str {
        self.devices.device_for(self.facing)
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// ONNX landmark model. Unset: the stub backend.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    /// "nhwc" or "nchw".
    pub layout: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub refresh_hz: u32,
    pub render_input_image: bool,
    pub draw_points: bool,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
    pub snapshot_format: SnapshotFormat,
}

impl Default for FaceMeshConfig {
    fn default() -> Self {
        Self::from_file(FaceMeshConfigFile::default())
    }
}

impl FaceMeshConfig {
    /// Defaults, then the file named by `FACEMESH_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACEMESH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FaceMeshConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let default_devices = CameraDevices::default();
        let camera = CameraSettings {
            devices: CameraDevices {
                front: camera.front.unwrap_or(default_devices.front),
                rear: camera.rear.unwrap_or(default_devices.rear),
            },
            facing: camera.facing.unwrap_or_default(),
            width: camera.width.unwrap_or(DEFAULT_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: camera.target_fps.unwrap_or(DEFAULT_FPS),
        };

        // Streaming mode with iris refinement on the GPU when available.
        let face_mesh = file.face_mesh.unwrap_or_default();
        let defaults = FaceMeshOptions::default();
        let options = FaceMeshOptions {
            static_image_mode: face_mesh.static_image_mode.unwrap_or(false),
            refine_landmarks: face_mesh.refine_landmarks.unwrap_or(true),
            run_on_gpu: face_mesh.run_on_gpu.unwrap_or(true),
            max_num_faces: face_mesh.max_num_faces.unwrap_or(defaults.max_num_faces),
            min_detection_confidence: face_mesh
                .min_detection_confidence
                .unwrap_or(defaults.min_detection_confidence),
            min_tracking_confidence: face_mesh
                .min_tracking_confidence
                .unwrap_or(defaults.min_tracking_confidence),
        };

        let backend = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            model_path: backend.model_path,
            input_size: backend.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            layout: backend
                .layout
                .unwrap_or_else(|| DEFAULT_MODEL_LAYOUT.to_string()),
        };

        let pipeline = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            queue_capacity: pipeline.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            backpressure: pipeline.backpressure.unwrap_or_default(),
        };

        let render = file.render.unwrap_or_default();
        let render = RenderSettings {
            refresh_hz: render.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            render_input_image: render.render_input_image.unwrap_or(true),
            draw_points: render.draw_points.unwrap_or(false),
            snapshot_dir: render.snapshot_dir,
            snapshot_every: render.snapshot_every.unwrap_or(DEFAULT_SNAPSHOT_EVERY),
            snapshot_format: render.snapshot_format.unwrap_or_default(),
        };

        Self {
            camera,
            options,
            backend,
            pipeline,
            render,
            permission: file.permission.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(front) = env_string("FACEMESH_CAMERA_FRONT") {
            self.camera.devices.front = front;
        }
        if let Some(rear) = env_string("FACEMESH_CAMERA_REAR") {
            self.camera.devices.rear = rear;
        }
        if let Some(facing) = env_string("FACEMESH_FACING") {
            self.camera.facing = facing
                .parse()
                .map_err(|e| anyhow!("FACEMESH_FACING: {}", e))?;
        }
        if let Some(width) = env_u32("FACEMESH_WIDTH")? {
            self.camera.width = width;
        }
        if let Some(height) = env_u32("FACEMESH_HEIGHT")? {
            self.camera.height = height;
        }
        if let Some(fps) = env_u32("FACEMESH_FPS")? {
            self.camera.target_fps = fps;
        }
        if let Some(gpu) = env_bool("FACEMESH_RUN_ON_GPU")? {
            self.options.run_on_gpu = gpu;
        }
        if let Some(refine) = env_bool("FACEMESH_REFINE_LANDMARKS")? {
            self.options.refine_landmarks = refine;
        }
        if let Some(static_mode) = env_bool("FACEMESH_STATIC_IMAGE_MODE")? {
            self.options.static_image_mode = static_mode;
        }
        if let Some(path) = env_string("FACEMESH_MODEL_PATH") {
            self.backend.model_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = env_string("FACEMESH_SNAPSHOT_DIR") {
            self.render.snapshot_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = env_string("FACEMESH_PERMISSION") {
            self.permission = mode
                .parse()
                .map_err(|e| anyhow!("FACEMESH_PERMISSION: {}", e))?;
        }
        Ok(())
    }

    /// Check every setting; errors name the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.camera.devices.front.trim().is_empty() || self.camera.devices.rear.trim().is_empty() {
            return Err(anyhow!("camera device strings must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera width and height must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.camera.target_fps > MAX_FPS {
            return Err(anyhow!(
                "camera target_fps must be at most {}, got {}",
                MAX_FPS,
                self.camera.target_fps
            ));
        }
        self.options.validate()?;
        if self.backend.input_size == 0 {
            return Err(anyhow!("backend input_size must be non-zero"));
        }
        match self.backend.layout.to_ascii_lowercase().as_str() {
            "nhwc" | "nchw" => {}
            other => {
                return Err(anyhow!(
                    "backend layout must be nhwc or nchw, got '{}'",
                    other
                ))
            }
        }
        if let Some(path) = &self.backend.model_path {
            if !path.is_file() {
                return Err(anyhow!("model file not found: {}", path.display()));
            }
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(anyhow!("pipeline queue_capacity must be at least 1"));
        }
        if self.render.refresh_hz == 0 {
            return Err(anyhow!("render refresh_hz must be at least 1"));
        }
        if self.render.snapshot_every == 0 {
            return Err(anyhow!("render snapshot_every must be at least 1"));
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            facing: self.camera.facing,
            target_fps: self.camera.target_fps,
            queue_capacity: self.pipeline.queue_capacity,
            backpressure: self.pipeline.backpressure,
            refresh_hz: Some(self.render.refresh_hz),
            ..SessionSettings::default()
        }
    }

    /// Registry with the ONNX backend pinned when a model is configured, otherwise the
    /// stub backend.
    pub fn backend_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        match &self.backend.model_path {
            Some(path) => self.register_model(&mut registry, path)?,
            None => registry.register(StubBackend::new()),
        }
        Ok(registry)
    }

    #[cfg(feature = "backend-tract")]
    fn register_model(&self, registry: &mut BackendRegistry, path: &Path) -> Result<()> {
        use crate::detect::{LandmarkBackend, TensorLayout, TractBackend};
        let layout = match self.backend.layout.to_ascii_lowercase().as_str() {
            "nchw" => TensorLayout::Nchw,
            _ => TensorLayout::Nhwc,
        };
        let backend = TractBackend::new(path, self.backend.input_size, layout)?;
        let name = backend.name();
        registry.register(backend);
        registry.set_default(name)
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_model(&self, _registry: &mut BackendRegistry, path: &Path) -> Result<()> {
        Err(anyhow!(
            "model {} requires the backend-tract feature",
            path.display()
        ))
    }
}

fn read_config_file(path: &Path) -> Result<FaceMeshConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    env_string(name)
        .map(|value| {
            value
                .parse::<u32>()
                .map_err(|_| anyhow!("{} must be a non-negative integer, got '{}'", name, value))
        })
        .transpose()
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    env_string(name)
        .map(|value| parse_bool(&value).ok_or_else(|| anyhow!("{} must be true or false, got '{}'", name, value)))
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
