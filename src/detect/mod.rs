//! Face landmark inference.
//!
//! Backends turn a `FrameView` into landmarks; the registry and selection logic pick a
//! backend that satisfies the configured `FaceMeshOptions`.

mod backend;
pub mod backends;
pub mod connections;
mod options;
mod registry;
mod result;
mod selection;

pub use backend::{Capability, LandmarkBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TensorLayout, TractBackend};
pub use options::{FaceMeshOptions, FaceMeshOptionsBuilder};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{
    FaceLandmarks, FaceMeshResult, NormalizedLandmark, NormalizedRect, RawFace,
    NUM_FACE_LANDMARKS, NUM_FACE_LANDMARKS_WITH_IRISES,
};
pub use selection::{select_backend, BackendSelection, ExecutionTarget, SelectedBackend};
