//! Camera permission.
//!
//! The session asks the gate once at creation: an already-granted permission is used
//! as is, anything else is requested. A denied permission is final for the session.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Shown (and kept) on the surface when camera permission is denied.
pub const PERMISSION_NOTICE: &str = "Grant camera permission in order to use the app";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Not decided yet; a request is needed.
    #[default]
    Unknown,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        self == PermissionState::Granted
    }
}

/// Source of truth for camera access.
pub trait PermissionGate: Send {
    /// Current state without prompting.
    fn check(&self) -> PermissionState;

    /// Ask for access. Never returns `Unknown`.
    fn request(&mut self) -> PermissionState;
}

/// Check first, request only if not already granted.
pub fn resolve(gate: &mut dyn PermissionGate) -> PermissionState {
    match gate.check() {
        PermissionState::Granted => PermissionState::Granted,
        _ => match gate.request() {
            PermissionState::Unknown => PermissionState::Denied,
            state => state,
        },
    }
}

/// Fixed answers, for tests and for `--deny-permission`.
#[derive(Clone, Debug)]
pub struct StaticPermission {
    current: PermissionState,
    answer: PermissionState,
    requests: usize,
}

impl StaticPermission {
    /// Already granted; `request` is never needed.
    pub fn granted() -> Self {
        Self {
            current: PermissionState::Granted,
            answer: PermissionState::Granted,
            requests: 0,
        }
    }

    /// Undecided; the user refuses when asked.
    pub fn denied() -> Self {
        Self::prompt(false)
    }

    /// Undecided; the user answers `grant` when asked.
    pub fn prompt(grant: bool) -> Self {
        Self {
            current: PermissionState::Unknown,
            answer: if grant {
                PermissionState::Granted
            } else {
                PermissionState::Denied
            },
            requests: 0,
        }
    }

    pub fn requests(&self) -> usize {
        self.requests
    }
}

impl PermissionGate for StaticPermission {
    fn check(&self) -> PermissionState {
        self.current
    }

    fn request(&mut self) -> PermissionState {
        self.requests += 1;
        self.current = self.answer;
        self.current
    }
}

/// Grants access when the process can read and write the device node.
#[derive(Clone, Debug)]
pub struct DevicePermission {
    path: PathBuf,
}

impl DevicePermission {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PermissionGate for DevicePermission {
    fn check(&self) -> PermissionState {
        match device_accessible(&self.path) {
            Ok(true) => PermissionState::Granted,
            Ok(false) => PermissionState::Unknown,
            Err(err) => {
                log::warn!("permission check for {} failed: {}", self.path.display(), err);
                PermissionState::Unknown
            }
        }
    }

    /// Device nodes cannot prompt; the answer is whatever the filesystem says now.
    fn request(&mut self) -> PermissionState {
        match self.check() {
            PermissionState::Granted => PermissionState::Granted,
            _ => {
                log::warn!(
                    "no read/write access to {} (check group membership, e.g. 'video')",
                    self.path.display()
                );
                PermissionState::Denied
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn device_accessible(path: &Path) -> Result<bool> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| anyhow!("device path contains a NUL byte: {}", path.display()))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) };
    Ok(rc == 0)
}

#[cfg(not(target_os = "linux"))]
fn device_accessible(path: &Path) -> Result<bool> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("device path must not be empty"));
    }
    Ok(std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .is_ok())
}

/// How the session decides camera permission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Device nodes are checked on disk; other devices are granted.
    #[default]
    Auto,
    Grant,
    Deny,
}

impl std::str::FromStr for PermissionMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "device" => Ok(PermissionMode::Auto),
            "grant" | "granted" => Ok(PermissionMode::Grant),
            "deny" | "denied" => Ok(PermissionMode::Deny),
            other => Err(anyhow!(
                "unknown permission mode '{}' (expected auto, grant or deny)",
                other
            )),
        }
    }
}

/// Gate for a camera device string.
pub fn gate_for_device(mode: PermissionMode, device: &str) -> Box<dyn PermissionGate> {
    match mode {
        PermissionMode::Grant => Box::new(StaticPermission::granted()),
        PermissionMode::Deny => Box::new(StaticPermission::denied()),
        PermissionMode::Auto if device.starts_with("/dev/") => {
            Box::new(DevicePermission::new(device))
        }
        PermissionMode::Auto => Box::new(StaticPermission::granted()),
    }
}
