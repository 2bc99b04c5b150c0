//! Tree copies in and out of the repository.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;
use walkdir::WalkDir;

use crate::util::fs::{remove_any, symlink};

/// Whiteout marker prefix: `.wh.<name>` deletes `<name>` from lower layers.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque marker: hides everything lower layers put in its directory.
pub const OPAQUE_MARKER: &str = ".wh..wh..opq";

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
  Ok(())
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> u32 {
  0o755
}

/// Copy one non-directory entry, replacing whatever is at `dest`.
fn copy_entry(src: &Path, dest: &Path, file_type: fs::FileType) -> io::Result<()> {
  remove_any(dest)?;
  if file_type.is_symlink() {
    symlink(&fs::read_link(src)?, dest)
  } else {
    fs::copy(src, dest).map(|_| ())
  }
}

/// Copy a tree for committing. Directories gain owner write permission so
/// later layers can be checked out on top of them.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;
  let mut dirs = Vec::new();

  for entry in WalkDir::new(src).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(io::Error::from)?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
      dirs.push((target, mode_of(&entry.metadata().map_err(io::Error::from)?) | 0o200));
    } else if file_type.is_file() || file_type.is_symlink() {
      copy_entry(entry.path(), &target, file_type)?;
    }
  }

  for (dir, mode) in dirs.into_iter().rev() {
    set_mode(&dir, mode)?;
  }
  Ok(())
}

/// Check out a layer tree on top of `dest` (union semantics).
///
/// Whiteouts are applied first, against what lower layers left in `dest`;
/// then every other entry is copied, replacing existing files.
pub fn checkout_union(layer: &Path, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;

  let mut whiteouts: BTreeSet<PathBuf> = BTreeSet::new();
  let mut opaque: BTreeSet<PathBuf> = BTreeSet::new();

  for entry in WalkDir::new(layer).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(io::Error::from)?;
    let name = entry.file_name().to_string_lossy();
    let rel = entry.path().strip_prefix(layer).unwrap_or(entry.path());
    let parent = rel.parent().map(Path::to_path_buf).unwrap_or_default();

    if name == OPAQUE_MARKER {
      opaque.insert(parent);
    } else if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
      whiteouts.insert(parent.join(hidden));
    }
  }

  for dir in &opaque {
    let target = dest.join(dir);
    if let Ok(children) = fs::read_dir(&target) {
      for child in children {
        remove_any(&child?.path())?;
      }
    }
    trace!(dir = %target.display(), "opaque directory cleared");
  }

  for hidden in &whiteouts {
    remove_any(&dest.join(hidden))?;
    trace!(path = %hidden.display(), "whiteout applied");
  }

  let mut dirs = Vec::new();
  for entry in WalkDir::new(layer).sort_by_file_name().min_depth(1) {
    let entry = entry.map_err(io::Error::from)?;
    if entry.file_name().to_string_lossy().starts_with(WHITEOUT_PREFIX) {
      continue;
    }

    let rel = entry.path().strip_prefix(layer).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      let is_dir = fs::symlink_metadata(&target).map(|m| m.is_dir()).unwrap_or(false);
      if !is_dir {
        remove_any(&target)?;
        fs::create_dir(&target)?;
      }
      dirs.push((target, mode_of(&entry.metadata().map_err(io::Error::from)?)));
    } else if file_type.is_file() || file_type.is_symlink() {
      copy_entry(entry.path(), &target, file_type)?;
    }
  }

  for (dir, mode) in dirs.into_iter().rev() {
    set_mode(&dir, mode)?;
  }
  Ok(())
}
