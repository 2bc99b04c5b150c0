//! Small filesystem primitives shared by the store and the deployment engine.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
  let mut name = path.file_name().map(OsString::from).unwrap_or_default();
  name.push(suffix);
  path.with_file_name(name)
}

/// Write `content` to `path` atomically (write to a sibling temp file, then rename).
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
  let temp_path = sibling_with_suffix(path, ".tmp");
  fs::write(&temp_path, content)?;
  fs::rename(&temp_path, path)
}

/// Point `link` at `target`, replacing whatever `link` was.
///
/// A `<link>.tmp` symlink is created first and renamed over `link`, so readers
/// observe either the old or the new target.
pub fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
  let temp_link = sibling_with_suffix(link, ".tmp");
  match fs::symlink_metadata(&temp_link) {
    Ok(_) => fs::remove_file(&temp_link)?,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(e),
  }
  symlink(target, &temp_link)?;
  fs::rename(&temp_link, link)
}

#[cfg(unix)]
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_dir(target, link)
}

/// Remove a file, symlink or directory tree. Missing paths are not an error.
pub fn remove_any(path: &Path) -> io::Result<()> {
  let meta = match fs::symlink_metadata(path) {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };

  if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}

/// True when something (including a dangling symlink) exists at `path`.
pub fn lexists(path: &Path) -> bool {
  fs::symlink_metadata(path).is_ok()
}

/// Total size in bytes of the regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
