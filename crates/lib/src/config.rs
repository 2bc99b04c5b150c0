//! Configuration: a YAML file plus environment overrides.
//!
//! ```yaml
//! checkout_path: /var/lib/containers/hostctr
//! store_path: /var/lib/hostctr/repo
//! default_storage: content-store   # or: daemon
//! use_links: true
//! sysroot: /
//! ```
//!
//! `HOSTCTR_CHECKOUT_PATH`, `HOSTCTR_STORE` and `HOSTCTR_SYSROOT` take
//! precedence over the file; `HOSTCTR_CONFIG` selects the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::backend::BackendKind;
use crate::platform::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

/// The on-disk configuration file. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
  pub checkout_path: Option<PathBuf>,
  pub store_path: Option<PathBuf>,
  pub default_storage: Option<BackendKind>,
  pub use_links: Option<bool>,
  pub sysroot: Option<PathBuf>,
}

impl ConfigFile {
  /// Read the file at `path`. A missing file is an empty configuration.
  pub fn read(path: &Path) -> Result<Self, ConfigError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Self::default());
      }
      Err(source) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    if content.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Root holding `<name>`, `<name>.0` and `<name>.1`.
  pub checkout_dir: PathBuf,
  pub store_dir: PathBuf,
  /// Host root for host files, units and tmpfiles declarations.
  pub sysroot: PathBuf,
  pub backend: BackendKind,
  pub use_links: bool,
  /// Per-user deployment (unprivileged caller).
  pub user: bool,
}

fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

impl Config {
  /// Load the configuration file selected by `HOSTCTR_CONFIG` (or the default
  /// location) and apply environment overrides.
  pub fn load(user: bool) -> Result<Self, ConfigError> {
    let file = ConfigFile::read(&paths::config_file())?;
    Ok(Self::from_file(file, user))
  }

  pub fn from_file(file: ConfigFile, user: bool) -> Self {
    let checkout_dir = env_path("HOSTCTR_CHECKOUT_PATH")
      .or(if user { None } else { file.checkout_path })
      .unwrap_or_else(|| paths::default_checkout_dir(user));
    let store_dir = env_path("HOSTCTR_STORE")
      .or(if user { None } else { file.store_path })
      .unwrap_or_else(|| paths::default_store_dir(user));
    let sysroot = env_path("HOSTCTR_SYSROOT")
      .or(file.sysroot)
      .unwrap_or_else(|| PathBuf::from("/"));

    Self {
      checkout_dir,
      store_dir,
      sysroot,
      backend: file.default_storage.unwrap_or_default(),
      use_links: file.use_links.unwrap_or(true),
      user,
    }
  }

  pub fn unit_dir(&self) -> PathBuf {
    paths::unit_dir(&self.sysroot, self.user)
  }

  pub fn tmpfiles_dir(&self) -> PathBuf {
    paths::tmpfiles_dir(&self.sysroot, self.user)
  }
}
