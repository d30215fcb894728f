use anyhow::Result;

use crate::detect::options::FaceMeshOptions;
use crate::detect::result::{NormalizedRect, RawFace};
use crate::frame::FrameView;

/// Capabilities a landmark backend may advertise.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// 468-point face mesh.
    FaceLandmarks,
    /// Ten extra iris landmarks (478-point mesh).
    IrisRefinement,
    /// Runs on a GPU.
    GpuExecution,
}

/// Landmark backend trait.
///
/// Backends receive a borrowed `FrameView` and must not keep pixels past the call.
/// Returned landmarks are normalized to the full frame, not to the ROI.
pub trait LandmarkBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: Capability) -> bool;

    /// Run landmark detection on a frame.
    ///
    /// `roi` is the tracked face region from the previous frame, or `None` to search the
    /// whole frame. Backends may return at most `options.max_num_faces` faces.
    fn detect(
        &mut self,
        view: &FrameView<'_>,
        roi: Option<&NormalizedRect>,
        options: &FaceMeshOptions,
    ) -> Result<Vec<RawFace>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
