use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{Capability, LandmarkBackend};

pub type SharedBackend = Arc<Mutex<dyn LandmarkBackend>>;

/// Thread-safe registry of landmark backends.
///
/// Backends are wrapped in `Mutex` because `LandmarkBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    /// Registration order, so selection is deterministic.
    order: Vec<String>,
    default_name: Option<String>,
    /// Set through `set_default`: selection never falls back to another backend.
    pinned: bool,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            order: Vec::new(),
            default_name: None,
            pinned: false,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: LandmarkBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        if !self.backends.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name and pin selection to it.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        self.pinned = true;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Registered backend names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Any registered backend supports the capability.
    pub fn any_supports(&self, capability: Capability) -> Result<bool> {
        for backend in self.backends.values() {
            if supports(backend, capability)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Select a backend that supports every requested capability.
    ///
    /// Prefers the default backend, then registration order. A pinned default is the
    /// only candidate.
    pub fn backend_for(&self, required: &[Capability]) -> Result<(String, SharedBackend)> {
        if self.pinned {
            let name = self
                .default_name
                .as_ref()
                .ok_or_else(|| anyhow!("no default backend"))?;
            let backend = self
                .backends
                .get(name)
                .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
            for capability in required {
                if !supports(backend, *capability)? {
                    return Err(anyhow!(
                        "backend '{}' does not support {:?}",
                        name,
                        capability
                    ));
                }
            }
            return Ok((name.clone(), backend.clone()));
        }

        let candidates = self
            .default_name
            .iter()
            .chain(self.order.iter().filter(|name| Some(*name) != self.default_name.as_ref()));

        for name in candidates {
            let Some(backend) = self.backends.get(name) else {
                continue;
            };
            let mut all = true;
            for capability in required {
                if !supports(backend, *capability)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok((name.clone(), backend.clone()));
            }
        }

        Err(anyhow!(
            "no registered backend supports capabilities {:?}",
            required
        ))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn supports(backend: &SharedBackend, capability: Capability) -> Result<bool> {
    let guard = backend
        .lock()
        .map_err(|_| anyhow!("backend lock poisoned"))?;
    Ok(guard.supports(capability))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        assert!(registry.default_backend().is_some());
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn backend_for_rejects_unsupported_capabilities() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        let (name, _) = registry.backend_for(&[Capability::FaceLandmarks])?;
        assert_eq!(name, "stub");
        assert!(registry.backend_for(&[Capability::GpuExecution]).is_err());
        assert!(!registry.any_supports(Capability::GpuExecution)?);
        Ok(())
    }

    #[test]
    fn empty_registry_has_no_backend() {
        let registry = BackendRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.backend_for(&[Capability::FaceLandmarks]).is_err());
    }

    /// Face landmarks only, no irises.
    struct PlainBackend;

    impl LandmarkBackend for PlainBackend {
        fn name(&self) -> &'static str {
            "plain"
        }

        fn supports(&self, capability: Capability) -> bool {
            matches!(capability, Capability::FaceLandmarks)
        }

        fn detect(
            &mut self,
            _view: &crate::frame::FrameView<'_>,
            _roi: Option<&crate::detect::result::NormalizedRect>,
            _options: &crate::detect::options::FaceMeshOptions,
        ) -> Result<Vec<crate::detect::result::RawFace>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn pinned_default_is_never_swapped() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(PlainBackend);
        registry.set_default("plain")?;

        let (name, _) = registry.backend_for(&[Capability::FaceLandmarks])?;
        assert_eq!(name, "plain");
        let err = registry
            .backend_for(&[Capability::FaceLandmarks, Capability::IrisRefinement])
            .err().expect("expected backend_for to fail");
        assert!(err.to_string().contains("'plain' does not support"));
        Ok(())
    }
}
