//! Container runtime detection.
//!
//! Privileged deployments run under `runc`, unprivileged ones under
//! `bwrap-oci`. The exec lines written into service units depend on the
//! installed runtime's version and flags, so they are probed once per
//! invocation.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const RUNC_PATH: &str = "/bin/runc";
pub const BWRAP_OCI_PATH: &str = "/usr/bin/bwrap-oci";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Runtime {
  Runc,
  BwrapOci,
}

impl Runtime {
  pub fn as_str(&self) -> &'static str {
    match self {
      Runtime::Runc => "runc",
      Runtime::BwrapOci => "bwrap-oci",
    }
  }

  pub fn for_mode(user: bool) -> Self {
    if user { Runtime::BwrapOci } else { Runtime::Runc }
  }
}

impl std::fmt::Display for Runtime {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What the installed runtime supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFeatures {
  pub runtime: Runtime,
  pub path: PathBuf,
  /// The runtime binary exists and answered `--version`.
  pub available: bool,
  /// runc 0.x, which only knows `start`.
  pub legacy: bool,
  /// `runc run` accepts `--pid-file` (detached mode).
  pub pid_file: bool,
}

impl RuntimeFeatures {
  /// Features of a runtime that could not be probed.
  pub fn unavailable(runtime: Runtime) -> Self {
    let path = match runtime {
      Runtime::Runc => RUNC_PATH,
      Runtime::BwrapOci => BWRAP_OCI_PATH,
    };
    Self {
      runtime,
      path: PathBuf::from(path),
      available: false,
      legacy: false,
      pid_file: false,
    }
  }

  pub fn detect(user: bool) -> Self {
    let runtime = Runtime::for_mode(user);
    let mut features = Self::unavailable(runtime);

    if !features.path.exists() {
      debug!(path = %features.path.display(), "container runtime not installed");
      return features;
    }

    if runtime == Runtime::BwrapOci {
      features.available = true;
      return features;
    }

    let Some(version) = capture(&features.path, &["--version"]) else {
      return features;
    };
    features.available = true;
    features.legacy = is_legacy_version(&version);

    if !features.legacy {
      features.pid_file = capture(&features.path, &["run", "--help"])
        .map(|help| help.contains("pid-file"))
        .unwrap_or(false);
    }

    debug!(
      runtime = %runtime,
      legacy = features.legacy,
      pid_file = features.pid_file,
      "detected container runtime"
    );
    features
  }
}

fn capture(program: &Path, args: &[&str]) -> Option<String> {
  let output = Command::new(program).args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `runc version 0.1.1` and friends.
fn is_legacy_version(version_output: &str) -> bool {
  version_output
    .lines()
    .next()
    .map(|line| line.contains("version 0"))
    .unwrap_or(false)
}
