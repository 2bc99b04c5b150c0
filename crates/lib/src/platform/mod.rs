//! Host probes: who is calling, and which container runtime is installed.

pub mod paths;
pub mod runtime;

use std::path::PathBuf;

pub use runtime::{Runtime, RuntimeFeatures};

/// Identity of the invoking user, as needed for value computation and tmpfiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
  pub uid: u32,
  pub gid: u32,
  /// True for unprivileged callers (per-user deployments).
  pub user: bool,
  pub home: PathBuf,
  pub runtime_dir: PathBuf,
}

/// Source of host facts. Faked in tests.
pub trait HostProbe {
  fn identity(&self) -> HostIdentity;
  fn runtime_features(&self, user: bool) -> RuntimeFeatures;
}

/// Probe backed by the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
  fn identity(&self) -> HostIdentity {
    let (uid, gid) = ids();
    HostIdentity {
      uid,
      gid,
      user: uid != 0,
      home: paths::home_dir(),
      runtime_dir: paths::runtime_dir(uid),
    }
  }

  fn runtime_features(&self, user: bool) -> RuntimeFeatures {
    RuntimeFeatures::detect(user)
  }
}

#[cfg(unix)]
fn ids() -> (u32, u32) {
  (
    rustix::process::geteuid().as_raw(),
    rustix::process::getegid().as_raw(),
  )
}

#[cfg(not(unix))]
fn ids() -> (u32, u32) {
  (0, 0)
}

/// Whether the current process runs with root privileges.
pub fn is_elevated() -> bool {
  ids().0 == 0
}
