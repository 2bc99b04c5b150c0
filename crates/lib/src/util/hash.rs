//! Hashing utilities for content addressing and host file checksums.
//!
//! - `ContentHash`: a full 64-character sha256, hex encoded
//! - `hash_directory()`: deterministic tree hashing, used for commit ids
//! - `hash_file()` / `hash_path()`: single file checksums
//! - `hash_bytes()`: arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character sha256 hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<ContentHash> for String {
  fn from(hash: ContentHash) -> Self {
    hash.0
  }
}

/// Error during hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to walk directory: {0}")]
  WalkDir(#[from] walkdir::Error),

  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to read symlink {path}: {source}")]
  ReadSymlink {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Compute a deterministic hash of a directory tree.
///
/// The hash covers the directory structure, file contents, the permission
/// bits of files and directories, and symlink targets. Timestamps and
/// ownership are ignored. Entries are visited in file-name order.
pub fn hash_directory(path: &Path) -> Result<ContentHash, HashError> {
  let mut hasher = Sha256::new();

  for entry in WalkDir::new(path).sort_by_file_name() {
    let entry = entry?;
    let entry_path = entry.path();

    let rel_path = entry_path
      .strip_prefix(path)
      .unwrap_or(entry_path)
      .to_string_lossy()
      .to_string();

    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_symlink() {
      format!("L:{}:{}", rel_path, hash_path(entry_path)?)
    } else if file_type.is_file() {
      format!("F:{}:{:o}:{}", rel_path, mode_of(&entry), hash_file(entry_path)?)
    } else if file_type.is_dir() {
      format!("D:{}:{:o}", rel_path, mode_of(&entry))
    } else {
      // Sockets, fifos and devices carry no content.
      continue;
    };

    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

#[cfg(unix)]
fn mode_of(entry: &walkdir::DirEntry) -> u32 {
  use std::os::unix::fs::PermissionsExt;
  entry.metadata().map(|m| m.permissions().mode() & 0o7777).unwrap_or(0)
}

#[cfg(not(unix))]
fn mode_of(_entry: &walkdir::DirEntry) -> u32 {
  0
}

/// Hash a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let read_err = |source| HashError::ReadFile {
    path: path.display().to_string(),
    source,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a path without following a final symlink.
///
/// Symlinks hash their target string, everything else hashes as a file.
pub fn hash_path(path: &Path) -> Result<ContentHash, HashError> {
  let is_link = fs::symlink_metadata(path)
    .map(|m| m.file_type().is_symlink())
    .unwrap_or(false);

  if is_link {
    let target = fs::read_link(path).map_err(|source| HashError::ReadSymlink {
      path: path.display().to_string(),
      source,
    })?;
    return Ok(hash_bytes(target.to_string_lossy().as_bytes()));
  }

  hash_file(path)
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}
