//! Materializing a revision's layers into a directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{ContentStore, Revision, StoreError};

#[derive(Debug, Error)]
pub enum RootfsError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to prepare {path}: {source}")]
  Prepare {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to sync the filesystem of {path}")]
  Sync { path: PathBuf },
}

/// An open handle on the directory being populated. Dropping it closes the
/// descriptor, on success and on every error path.
struct DirHandle {
  path: PathBuf,
  file: File,
}

impl DirHandle {
  fn open(path: &Path) -> Result<Self, RootfsError> {
    fs::create_dir_all(path).map_err(|source| RootfsError::Prepare {
      path: path.to_path_buf(),
      source,
    })?;
    let file = File::open(path).map_err(|source| RootfsError::Prepare {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(Self {
      path: path.to_path_buf(),
      file,
    })
  }

  /// Flush the filesystem holding the directory.
  fn sync(&self) -> Result<(), RootfsError> {
    #[cfg(target_os = "linux")]
    match rustix::fs::syncfs(&self.file) {
      Ok(()) => return Ok(()),
      Err(e) => debug!(error = %e, "syncfs failed, falling back to sync(1)"),
    }
    #[cfg(not(target_os = "linux"))]
    let _ = &self.file;

    let status = Command::new("sync")
      .arg("--file-system")
      .arg(&self.path)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status();

    match status {
      Ok(status) if status.success() => Ok(()),
      Ok(_) | Err(_) => Err(RootfsError::Sync {
        path: self.path.clone(),
      }),
    }
  }
}

/// Flush the filesystem holding `path`, an existing directory. Slot contents
/// are synced this way before the slot becomes active.
pub fn sync_dir(path: &Path) -> Result<(), RootfsError> {
  let file = File::open(path).map_err(|source| RootfsError::Prepare {
    path: path.to_path_buf(),
    source,
  })?;
  let dir = DirHandle {
    path: path.to_path_buf(),
    file,
  };
  dir.sync()?;
  debug!(path = %path.display(), "directory synced");
  Ok(())
}

/// Check out every layer of `revision` into `rootfs`, base layer first, then
/// sync the filesystem. Returns the layer commits in checkout order.
pub fn materialize(store: &dyn ContentStore, revision: &Revision, rootfs: &Path) -> Result<Vec<String>, RootfsError> {
  let layers = revision.layer_commits(store)?;
  let dir = DirHandle::open(rootfs)?;

  for commit in &layers {
    store.checkout_layer(commit, rootfs)?;
  }

  if let Err(e) = dir.sync() {
    warn!(error = %e, "filesystem sync failed");
    return Err(e);
  }

  info!(
    image = %revision.image,
    layers = layers.len(),
    rootfs = %rootfs.display(),
    "rootfs materialized"
  );
  Ok(layers)
}
