//! The info record persisted in every deployment slot.
//!
//! The record is the commit point of a checkout: it is written last, after
//! rootfs, configuration and units, and a slot without a readable record is
//! treated as never having succeeded.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::INFO_FILENAME;
use crate::hostfiles::Checksums;
use crate::platform::Runtime;
use crate::util::fs::write_atomic;

/// Current info record schema version.
pub const INFO_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum InfoError {
  #[error("deployment info {0} not found")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported info schema version {found} in {path} (newest known: {INFO_SCHEMA_VERSION})")]
  UnsupportedVersion { path: PathBuf, found: u32 },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize deployment info: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// How the deployment is packaged for the host package manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemPackage {
  /// Package when the image asks for it (privileged installs only).
  Auto,
  /// Only build the package file.
  Build,
  No,
  Yes,
  /// Not recorded; behaves as `No`.
  #[default]
  Absent,
}

impl SystemPackage {
  pub fn as_str(&self) -> &'static str {
    match self {
      SystemPackage::Auto => "auto",
      SystemPackage::Build => "build",
      SystemPackage::No => "no",
      SystemPackage::Yes => "yes",
      SystemPackage::Absent => "absent",
    }
  }
}

impl fmt::Display for SystemPackage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SystemPackage {
  type Err = String;

  /// Parse a user-supplied mode. `absent` is internal and not accepted.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "auto" => Ok(SystemPackage::Auto),
      "build" => Ok(SystemPackage::Build),
      "no" => Ok(SystemPackage::No),
      "yes" => Ok(SystemPackage::Yes),
      other => Err(format!(
        "invalid system-package mode `{}` (expected auto, build, no or yes)",
        other
      )),
    }
  }
}

fn default_schema_version() -> u32 {
  1
}

/// Persisted metadata of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InfoRecord {
  #[serde(default = "default_schema_version")]
  pub schema_version: u32,
  pub image: String,
  /// Image id of the deployed revision.
  pub revision: String,
  pub content_store_commit: String,
  /// Seconds since the epoch.
  pub created: u64,
  #[serde(default)]
  pub values: BTreeMap<String, String>,
  #[serde(default = "default_true")]
  pub has_container_service: bool,
  /// Logical host path -> sha256 at install time.
  #[serde(default)]
  pub installed_files_checksum: Checksums,
  #[serde(default)]
  pub installed_files_template: Vec<String>,
  #[serde(default)]
  pub rename_installed_files: BTreeMap<String, String>,
  #[serde(default)]
  pub rpm_installed: Option<String>,
  #[serde(default)]
  pub system_package: SystemPackage,
  #[serde(default)]
  pub remote: Option<String>,
  #[serde(default)]
  pub use_links: bool,
  #[serde(default = "default_runtime")]
  pub runtime: Runtime,
}

fn default_true() -> bool {
  true
}

fn default_runtime() -> Runtime {
  Runtime::Runc
}

/// On-disk shape: the record plus the legacy `installed-files` list, kept
/// for readers that only know the path list.
#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct InfoRecordOut<'a> {
  #[serde(flatten)]
  record: &'a InfoRecord,
  installed_files: Vec<&'a String>,
}

impl InfoRecord {
  pub fn path(slot: &Path) -> PathBuf {
    slot.join(INFO_FILENAME)
  }

  /// Host paths recorded for this deployment, sorted.
  pub fn installed_files(&self) -> Vec<&String> {
    self.installed_files_checksum.keys().collect()
  }

  /// Read the record of `slot`.
  pub fn load(slot: &Path) -> Result<Self, InfoError> {
    let path = Self::path(slot);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(InfoError::NotFound(path)),
      Err(source) => return Err(InfoError::Read { path, source }),
    };

    let record: InfoRecord = serde_json::from_str(&content).map_err(|source| InfoError::Parse {
      path: path.clone(),
      source,
    })?;
    if record.schema_version > INFO_SCHEMA_VERSION {
      return Err(InfoError::UnsupportedVersion {
        path,
        found: record.schema_version,
      });
    }
    Ok(record)
  }

  /// Rewrite the whole record atomically.
  pub fn save(&self, slot: &Path) -> Result<(), InfoError> {
    let path = Self::path(slot);
    let out = InfoRecordOut {
      record: self,
      installed_files: self.installed_files(),
    };
    let content = serde_json::to_string_pretty(&out).map_err(InfoError::Serialize)?;
    write_atomic(&path, content.as_bytes()).map_err(|source| InfoError::Write { path, source })
  }
}
