//! Reconciling the files an image copies onto the host.
//!
//! Every host file installed from `exports/hostfs` is recorded with the
//! sha256 it had when installed. On the next reconciliation (upgrade,
//! rollback, uninstall) a recorded file is deleted only if its checksum is
//! unchanged, so local edits survive. Paths are recorded as absolute logical
//! host paths; `prefix` maps them onto the real filesystem.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::exports::HOSTFS_DIR;
use crate::template::{self, TemplateError};
use crate::util::fs::{lexists, remove_any, symlink};
use crate::util::hash::{HashError, hash_path};
use crate::values::ValueMap;

/// Logical host path -> sha256 at install time.
pub type Checksums = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum HostFileError {
  #[error("failed to update {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to checksum {path}: {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: HashError,
  },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error(transparent)]
  Template(#[from] TemplateError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> HostFileError + '_ {
  move |source| HostFileError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Where and how files are installed.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileTarget<'a> {
  /// Host root the logical paths are relative to.
  pub prefix: &'a Path,
  /// Source logical path -> destination logical path, already rendered.
  pub rename: &'a BTreeMap<String, String>,
  /// Destination logical paths (after renaming) rendered as templates.
  pub templates: &'a [String],
  pub values: &'a ValueMap,
  /// Hard-link read-only `/usr` content instead of copying.
  pub use_links: bool,
}

/// Map a logical host path onto `prefix`.
pub fn host_path(prefix: &Path, logical: &str) -> PathBuf {
  prefix.join(logical.trim_start_matches('/'))
}

/// Render rename targets, which may reference template variables.
pub fn render_renames(
  rename: &BTreeMap<String, String>,
  values: &ValueMap,
) -> Result<BTreeMap<String, String>, TemplateError> {
  rename
    .iter()
    .map(|(from, to)| Ok((from.clone(), template::substitute("manifest.json", to, values)?)))
    .collect()
}

/// Outcome of the checksum-gated deletion pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
  pub removed: Vec<String>,
  /// Files left in place because they were modified after installation.
  pub kept: Vec<String>,
}

/// Delete recorded files whose checksum is unchanged.
pub fn remove_installed(old: &Checksums, prefix: &Path) -> Result<RemovalReport, HostFileError> {
  let mut report = RemovalReport::default();

  for (logical, checksum) in old {
    let path = host_path(prefix, logical);
    if !lexists(&path) {
      debug!(path = %logical, "recorded host file already gone");
      continue;
    }

    let current = hash_path(&path).map_err(|source| HostFileError::Hash {
      path: path.clone(),
      source,
    })?;

    if current.0 == *checksum {
      fs::remove_file(&path).map_err(io_err(&path))?;
      report.removed.push(logical.clone());
    } else {
      warn!(path = %logical, "host file was modified, not removing it");
      report.kept.push(logical.clone());
    }
  }

  Ok(report)
}

/// Remove `old` (checksum-gated), then install `exports/hostfs` into the
/// target. Returns the checksums of the newly installed files.
///
/// A destination that already exists is left alone and not recorded, so a
/// file the admin edited is never overwritten. Any other failure removes the
/// files installed so far by this call.
pub fn reconcile(
  old: &Checksums,
  exports: Option<&Path>,
  target: &ReconcileTarget,
) -> Result<Checksums, HostFileError> {
  let report = remove_installed(old, target.prefix)?;
  let installed = match exports {
    Some(exports) => install(exports, target)?,
    None => Checksums::new(),
  };

  info!(
    removed = report.removed.len(),
    kept = report.kept.len(),
    installed = installed.len(),
    prefix = %target.prefix.display(),
    "host files reconciled"
  );
  Ok(installed)
}

/// Install `exports/hostfs` without a deletion pass. Used to put a previous
/// deployment's files back after a failed checkout or rollback.
pub fn restore(exports: &Path, target: &ReconcileTarget) -> Result<Checksums, HostFileError> {
  install(exports, target)
}

fn install(exports: &Path, target: &ReconcileTarget) -> Result<Checksums, HostFileError> {
  let hostfs = exports.join(HOSTFS_DIR);
  let mut installed = Checksums::new();
  if !hostfs.is_dir() {
    return Ok(installed);
  }

  let result = install_tree(&hostfs, target, &mut installed);
  if let Err(e) = result {
    for logical in installed.keys() {
      let path = host_path(target.prefix, logical);
      if let Err(cleanup) = remove_any(&path) {
        warn!(path = %path.display(), error = %cleanup, "failed to remove partially installed file");
      }
    }
    return Err(e);
  }
  Ok(installed)
}

fn install_tree(
  hostfs: &Path,
  target: &ReconcileTarget,
  installed: &mut Checksums,
) -> Result<(), HostFileError> {
  for entry in WalkDir::new(hostfs).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(|source| HostFileError::Walk {
      path: hostfs.to_path_buf(),
      source,
    })?;
    let src = entry.path();
    let rel = src.strip_prefix(hostfs).unwrap_or(src);
    let logical = format!(
      "/{}",
      rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
    );
    let dest_logical = target.rename.get(&logical).cloned().unwrap_or_else(|| logical.clone());
    let dest = host_path(target.prefix, &dest_logical);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      let is_empty = fs::read_dir(src).map_err(io_err(src))?.next().is_none();
      if is_empty {
        fs::create_dir_all(&dest).map_err(io_err(&dest))?;
      }
      continue;
    }

    if lexists(&dest) {
      warn!(path = %dest_logical, "host file already present, not overwriting it");
      continue;
    }

    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    if file_type.is_symlink() {
      let link_target = fs::read_link(src).map_err(io_err(src))?;
      symlink(&link_target, &dest).map_err(io_err(&dest))?;
    } else if target.templates.contains(&dest_logical) {
      let text = fs::read_to_string(src).map_err(io_err(src))?;
      let rendered = template::substitute(&dest_logical, &text, target.values)?;
      fs::write(&dest, rendered).map_err(io_err(&dest))?;
      let perms = fs::metadata(src).map_err(io_err(src))?.permissions();
      fs::set_permissions(&dest, perms).map_err(io_err(&dest))?;
    } else if !(target.use_links && dest_logical.starts_with("/usr/") && try_hard_link(src, &dest)) {
      fs::copy(src, &dest).map_err(io_err(&dest))?;
    }

    let checksum = hash_path(&dest).map_err(|source| HostFileError::Hash {
      path: dest.clone(),
      source,
    })?;
    debug!(path = %dest_logical, "installed host file");
    installed.insert(dest_logical, checksum.0);
  }

  Ok(())
}

/// Hard-link `src` to `dest` when both sides carry the same SELinux label.
/// Any failure means the caller copies instead.
fn try_hard_link(src: &Path, dest: &Path) -> bool {
  let Some(dest_dir) = dest.parent() else {
    return false;
  };
  if !selinux_labels_match(src, dest_dir) {
    return false;
  }
  match fs::hard_link(src, dest) {
    Ok(()) => true,
    Err(e) => {
      debug!(path = %dest.display(), error = %e, "hard link failed, copying");
      false
    }
  }
}

#[cfg(unix)]
fn selinux_labels_match(src: &Path, dest_dir: &Path) -> bool {
  const LABEL: &str = "security.selinux";
  match (xattr::get(src, LABEL), xattr::get(dest_dir, LABEL)) {
    (Ok(a), Ok(b)) => a == b,
    _ => false,
  }
}

#[cfg(not(unix))]
fn selinux_labels_match(_src: &Path, _dest_dir: &Path) -> bool {
  false
}
