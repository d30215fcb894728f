use anyhow::{anyhow, Result};

use super::backend::Capability;
use super::options::FaceMeshOptions;
use super::registry::{BackendRegistry, SharedBackend};

/// Where inference runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionTarget {
    Cpu,
    Gpu,
}

/// How strictly an execution target is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendSelection {
    /// Any backend that can produce the mesh.
    Auto,
    /// Use the target when some backend offers it, fall back otherwise.
    Prefer(ExecutionTarget),
    /// Fail when no backend offers the target.
    Require(ExecutionTarget),
}

impl BackendSelection {
    /// `run_on_gpu` is a preference: no GPU backend means CPU with a warning.
    pub fn from_options(options: &FaceMeshOptions) -> Self {
        if options.run_on_gpu {
            BackendSelection::Prefer(ExecutionTarget::Gpu)
        } else {
            BackendSelection::Auto
        }
    }
}

/// Outcome of backend selection.
pub struct SelectedBackend {
    pub name: String,
    pub backend: SharedBackend,
    pub target: ExecutionTarget,
}

impl std::fmt::Debug for SelectedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedBackend")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

/// Pick a backend for the given options.
///
/// Iris refinement is a hard requirement when `refine_landmarks` is set.
pub fn select_backend(
    registry: &BackendRegistry,
    options: &FaceMeshOptions,
    selection: BackendSelection,
) -> Result<SelectedBackend> {
    let mut required = vec![Capability::FaceLandmarks];
    if options.refine_landmarks {
        required.push(Capability::IrisRefinement);
    }

    let wants_gpu = matches!(
        selection,
        BackendSelection::Prefer(ExecutionTarget::Gpu) | BackendSelection::Require(ExecutionTarget::Gpu)
    );

    if wants_gpu {
        let mut gpu_required = required.clone();
        gpu_required.push(Capability::GpuExecution);
        match registry.backend_for(&gpu_required) {
            Ok((name, backend)) => {
                return Ok(SelectedBackend {
                    name,
                    backend,
                    target: ExecutionTarget::Gpu,
                })
            }
            Err(err) => {
                if let BackendSelection::Require(_) = selection {
                    return Err(anyhow!("GPU execution required but unavailable: {}", err));
                }
                log::warn!("GPU execution requested but no GPU backend is registered; using CPU");
            }
        }
    }

    let (name, backend) = registry.backend_for(&required)?;
    Ok(SelectedBackend {
        name,
        backend,
        target: ExecutionTarget::Cpu,
    })
}
