//! facemesh
//!
//! Real-time camera-driven face landmark detection and display.
//!
//! # Architecture
//!
//! Three components with a trait at each boundary:
//!
//! 1. **Frame source** (`ingest`, `camera`): a `FrameSource` pulled on a capture thread
//!    by `CameraInput`, which hands each frame to a listener.
//! 2. **Inference pipeline** (`pipeline`, `solution`, `detect`): a bounded `FrameQueue`
//!    feeds a worker that runs `FaceMesh` (a `LandmarkBackend` plus tracking state). Each
//!    frame either reaches the surface or is reported to an `ErrorSink`.
//! 3. **Presentation surface** (`render`): a `SolutionSurface` receives results and draws
//!    them into a canvas at its own refresh rate.
//!
//! `session` ties them together with permission gating (`permission`) and the
//! resume/pause lifecycle.
//!
//! # Module Structure
//!
//! - `frame`: owned camera frames and borrowed views
//! - `ingest`: synthetic, image-sequence and V4L2 cameras
//! - `camera`: capture thread and frame listener
//! - `permission`: camera permission gates
//! - `detect`: options, results, backends, backend selection
//! - `solution`: the face mesh solution object
//! - `pipeline`: queue, worker, error sinks
//! - `render`: canvas, mesh renderer, surface, render targets
//! - `session`: lifecycle
//! - `config`: layered configuration

pub mod camera;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod permission;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod solution;

pub use camera::{CameraInput, CameraStats};
pub use config::FaceMeshConfig;
pub use detect::{
    BackendRegistry, BackendSelection, Capability, ExecutionTarget, FaceLandmarks,
    FaceMeshOptions, FaceMeshResult, LandmarkBackend, NormalizedLandmark, NormalizedRect,
    StubBackend,
};
pub use frame::{CameraFrame, FrameView};
pub use ingest::{CameraDevices, CameraFacing, CameraRequest, FrameSource};
pub use permission::{PermissionGate, PermissionMode, PermissionState, StaticPermission};
pub use pipeline::{BackpressurePolicy, ErrorSink, FrameQueue, LogErrorSink, Pipeline};
pub use render::{SolutionSurface, SurfaceView};
pub use session::{Session, SessionParts, SessionReport, SessionSettings};
pub use solution::{FaceMesh, RenderData};
