//! Session lifecycle.
//!
//! A `Session` owns the face mesh pipeline, the presentation surface and the camera
//! permission decision. The platform drives it with `resume`/`pause`:
//!
//! - `create` resolves camera permission once. On denial the permission notice is
//!   shown and stays up; no camera is ever created.
//! - `resume` builds a fresh `CameraInput`, wires it to a new frame queue and starts it
//!   at the surface dimensions. One start per resume.
//! - `pause` releases the camera (joining its capture thread), then closes the queue
//!   and waits for the pipeline worker.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::camera::{CameraInput, CameraStats, DEFAULT_MAX_CONSECUTIVE_ERRORS};
use crate::config::FaceMeshConfig;
use crate::ingest::{self, CameraDevices, CameraFacing, CameraRequest, FrameSource};
use crate::permission::{self, PermissionGate, PermissionMode, PermissionState, PERMISSION_NOTICE};
use crate::pipeline::{
    BackpressurePolicy, ErrorSink, FrameQueue, LogErrorSink, Pipeline, PipelineHandle,
    PipelineStats, PushOutcome,
};
use crate::render::{
    FaceMeshRenderer, MemoryTarget, RefreshHandle, RenderTarget, SnapshotTarget, SolutionSurface,
    SurfaceStats, SurfaceView,
};
use crate::solution::FaceMesh;

/// Opens the camera for a facing. Called once per resume.
pub type CameraFactory = Box<dyn FnMut(CameraFacing) -> Result<Box<dyn FrameSource>> + Send>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub facing: CameraFacing,
    pub target_fps: u32,
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    /// Surface refresh rate. `None`: the caller draws with `SurfaceView::draw_pending`.
    pub refresh_hz: Option<u32>,
    pub max_consecutive_errors: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            facing: CameraFacing::Front,
            target_fps: 30,
            queue_capacity: 2,
            backpressure: BackpressurePolicy::DropOldest,
            refresh_hz: Some(30),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

/// Everything a session is assembled from.
pub struct SessionParts {
    pub settings: SessionSettings,
    pub permission: Box<dyn PermissionGate>,
    pub cameras: CameraFactory,
    pub solution: FaceMesh,
    pub surface: Arc<SurfaceView>,
    pub errors: Arc<dyn ErrorSink>,
}

impl SessionParts {
    /// Assemble a session from loaded configuration.
    ///
    /// `permission` overrides the configured permission mode.
    pub fn from_config(config: &FaceMeshConfig, permission: Option<PermissionMode>) -> Result<Self> {
        let registry = config.backend_registry()?;
        let solution = FaceMesh::new(config.options.clone(), &registry)?;

        let target: Box<dyn RenderTarget> = match &config.render.snapshot_dir {
            Some(dir) => Box::new(SnapshotTarget::new(
                dir,
                config.render.snapshot_every,
                config.render.snapshot_format,
            )?),
            None => Box::new(MemoryTarget::new()),
        };
        let surface = SurfaceView::new(config.camera.width, config.camera.height, target)?
            .with_renderer(FaceMeshRenderer::new().with_points(config.render.draw_points));
        surface.set_render_input_image(config.render.render_input_image);

        let mode = permission.unwrap_or(config.permission);
        Ok(Self {
            settings: config.session_settings(),
            permission: permission::gate_for_device(mode, config.camera.device()),
            cameras: device_cameras(config.camera.devices.clone()),
            solution,
            surface: Arc::new(surface),
            errors: Arc::new(LogErrorSink),
        })
    }
}

/// Camera factory opening the configured device for each facing.
pub fn device_cameras(devices: CameraDevices) -> CameraFactory {
    Box::new(move |facing: CameraFacing| ingest::open_source(devices.device_for(facing)))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub permission: PermissionState,
    pub resumes: u64,
    pub camera_starts: u64,
    pub camera_closes: u64,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub results_presented: u64,
    pub errors_logged: u64,
    pub frames_dropped: u64,
    pub frames_drawn: u64,
    pub notices_drawn: u64,
    pub notice: Option<String>,
}

impl SessionReport {
    fn new(
        permission: PermissionState,
        resumes: u64,
        camera: CameraStats,
        pipeline: PipelineStats,
        surface: SurfaceStats,
        notice: Option<String>,
    ) -> Self {
        Self {
            permission,
            resumes,
            camera_starts: camera.starts,
            camera_closes: camera.closes,
            frames_captured: camera.frames_delivered,
            frames_sent: pipeline.frames_sent,
            results_presented: pipeline.results_presented,
            errors_logged: pipeline.errors_logged,
            frames_dropped: pipeline.frames_dropped,
            frames_drawn: surface.frames_drawn,
            notices_drawn: surface.notices_drawn,
            notice,
        }
    }
}

struct Running {
    camera: CameraInput,
    pipeline: PipelineHandle,
}

pub struct Session {
    settings: SessionSettings,
    permission: PermissionState,
    cameras: CameraFactory,
    surface: Arc<SurfaceView>,
    idle: Option<Pipeline>,
    running: Option<Running>,
    refresh: Option<RefreshHandle>,
    camera_totals: CameraStats,
    resumes: u64,
}

impl Session {
    pub fn create(parts: SessionParts) -> Result<Self> {
        let SessionParts {
            settings,
            mut permission,
            cameras,
            solution,
            surface,
            errors,
        } = parts;

        let state = permission::resolve(permission.as_mut());
        if state.is_granted() {
            log::info!("camera permission granted");
        } else {
            surface.show_notice(PERMISSION_NOTICE);
        }

        let refresh = match settings.refresh_hz {
            Some(hz) => Some(surface.start_refresh(hz)?),
            None => None,
        };
        let surface_dyn: Arc<dyn SolutionSurface> = surface.clone();
        let pipeline = Pipeline::new(solution, surface_dyn, errors);

        Ok(Self {
            settings,
            permission: state,
            cameras,
            surface,
            idle: Some(pipeline),
            running: None,
            refresh,
            camera_totals: CameraStats::default(),
            resumes: 0,
        })
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn surface(&self) -> &Arc<SurfaceView> {
        &self.surface
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_resumed(&self) -> bool {
        self.running.is_some()
    }

    /// Start the camera. Returns whether a camera was started.
    pub fn resume(&mut self) -> Result<bool> {
        if !self.permission.is_granted() {
            log::warn!("resume: camera permission not granted; camera stays off");
            return Ok(false);
        }
        if self.running.is_some() {
            log::warn!("resume: session already resumed");
            return Ok(false);
        }

        let mut pipeline = self
            .idle
            .take()
            .ok_or_else(|| anyhow!("session pipeline unavailable"))?;
        pipeline.solution_mut().reset();
        let queue = Arc::new(FrameQueue::new(
            self.settings.queue_capacity,
            self.settings.backpressure,
        )?);
        let handle = pipeline.spawn(Arc::clone(&queue))?;

        match self.start_camera(queue) {
            Ok(camera) => {
                self.resumes += 1;
                self.running = Some(Running {
                    camera,
                    pipeline: handle,
                });
                Ok(true)
            }
            Err(err) => {
                self.idle = Some(handle.stop()?);
                Err(err)
            }
        }
    }

    fn start_camera(&mut self, queue: Arc<FrameQueue>) -> Result<CameraInput> {
        let facing = self.settings.facing;
        let source = (self.cameras)(facing)
            .with_context(|| format!("create {} camera", facing))?;
        let mut camera = CameraInput::new(source)
            .with_max_consecutive_errors(self.settings.max_consecutive_errors);
        camera.set_new_frame_listener(move |frame| match queue.push(frame) {
            Ok(PushOutcome::Queued | PushOutcome::ReplacedOldest) => {}
            Ok(PushOutcome::Dropped) => log::debug!("frame queue full; frame dropped"),
            Ok(PushOutcome::Closed) => log::debug!("frame queue closed; frame dropped"),
            Err(err) => log::warn!("frame queue push failed: {:#}", err),
        })?;

        let (width, height) = self.surface.dimensions();
        let request = CameraRequest {
            facing,
            width,
            height,
            target_fps: self.settings.target_fps,
        };
        camera.start(&request)?;
        Ok(camera)
    }

    /// Release the camera and stop the pipeline worker. Returns whether a camera was released.
    ///
    /// The queue closes before the camera, so no frame reaches inference once the camera
    /// is released.
    pub fn pause(&mut self) -> Result<bool> {
        let Some(Running {
            mut camera,
            pipeline,
        }) = self.running.take()
        else {
            return Ok(false);
        };
        pipeline.queue().close();
        let released = camera.close();
        let stats = camera.stats();
        self.camera_totals.starts += stats.starts;
        self.camera_totals.closes += stats.closes;
        self.camera_totals.frames_delivered += stats.frames_delivered;

        self.idle = Some(pipeline.stop()?);
        log::info!("session paused ({} frames captured)", stats.frames_delivered);
        Ok(released)
    }

    pub fn report(&self) -> SessionReport {
        let mut camera = self.camera_totals;
        let pipeline = match (&self.running, &self.idle) {
            (Some(running), _) => {
                let live = running.camera.stats();
                camera.starts += live.starts;
                camera.closes += live.closes;
                camera.frames_delivered += live.frames_delivered;
                running.pipeline.stats()
            }
            (None, Some(idle)) => idle.stats(),
            (None, None) => PipelineStats::default(),
        };
        SessionReport::new(
            self.permission,
            self.resumes,
            camera,
            pipeline,
            self.surface.stats(),
            self.surface.notice(),
        )
    }

    /// Pause if needed, stop the refresh thread and return the final report.
    pub fn shutdown(mut self) -> Result<SessionReport> {
        self.pause()?;
        if let Some(refresh) = self.refresh.take() {
            refresh.stop()?;
        }
        // Draw the last result if the refresh thread did not get to it.
        self.surface.draw_pending()?;
        Ok(self.report())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.pause() {
            log::warn!("session drop: pause failed: {:#}", err);
        }
        if let Some(refresh) = self.refresh.take() {
            if let Err(err) = refresh.stop() {
                log::warn!("session drop: {:#}", err);
            }
        }
    }
}
