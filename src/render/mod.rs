//! Presentation: rasterizing face mesh results and handing them to a render target.

mod canvas;
mod renderer;
mod surface;
mod target;

pub use canvas::{Canvas, Color};
pub use renderer::FaceMeshRenderer;
pub use surface::{RefreshHandle, SolutionSurface, SurfaceStats, SurfaceView};
pub use target::{MemoryTarget, RenderTarget, SnapshotFormat, SnapshotTarget};
