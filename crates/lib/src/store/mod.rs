//! Content store client.
//!
//! Images live in a content-addressed repository as one commit per layer plus
//! one commit per image whose metadata carries the manifest. This module
//! defines the client interface the deployment engine uses and ships the
//! directory-backed implementation, [`FsRepo`].
//!
//! # Layout
//!
//! ```text
//! <repo>/
//! ├── refs/ociimage/<encoded-ref>   # file holding a commit id
//! └── objects/<commit>/
//!     ├── commit.json               # {created, metadata: {manifest?, layer?}}
//!     └── tree/                     # layer contents (empty for image commits)
//! ```

pub mod manifest;
pub mod reference;
pub mod repo;
pub mod tree;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use manifest::{ImageManifest, LayerRef};
pub use reference::{ImageRef, decode_ref, encode_ref, image_branch, layer_branch};
pub use repo::FsRepo;

use tree::{OPAQUE_MARKER, WHITEOUT_PREFIX};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("image {0} not found")]
  NotFound(String),

  #[error("more images matching prefix `{prefix}`: {}", .matches.join(", "))]
  Ambiguous { prefix: String, matches: Vec<String> },

  #[error("layer {0} not found in the store; please pull the image again")]
  LayerMissing(String),

  #[error("invalid manifest for {image}: {source}")]
  InvalidManifest {
    image: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("corrupt commit {commit}: {message}")]
  CorruptCommit { commit: String, message: String },

  #[error("failed to access {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to hash {path}: {source}")]
  Hash {
    path: PathBuf,
    #[source]
    source: crate::util::hash::HashError,
  },

  #[error("failed to serialize commit metadata: {0}")]
  Serialize(#[source] serde_json::Error),
}

impl StoreError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.into();
    move |source| StoreError::Io { path, source }
  }
}

/// A ref and the commit it currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
  pub branch: String,
  pub commit: String,
}

/// Listing entry for an image in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageInfo {
  pub id: String,
  pub image_id: String,
  pub version: String,
  pub repo_tags: Vec<String>,
  pub created: u64,
  pub labels: BTreeMap<String, String>,
  pub commit: String,
  pub branch: String,
  pub virtual_size: Option<u64>,
}

impl ImageInfo {
  pub fn is_tagged(&self) -> bool {
    self.repo_tags.iter().any(|t| t != "<none>")
  }
}

/// Counts reported by [`ContentStore::prune`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StorePruneStats {
  pub refs_deleted: usize,
  pub objects_deleted: usize,
  pub bytes_freed: u64,
  pub deleted_refs: Vec<String>,
}

/// Read access to images and layers, plus the few maintenance operations
/// the CLI exposes.
pub trait ContentStore {
  /// Map an image name (or a unique image-id prefix) to refs.
  fn resolve(&self, image: &str, allow_multiple: bool) -> Result<Vec<ResolvedImage>, StoreError>;

  /// The normalized manifest stored on an image commit, if any.
  fn manifest(&self, commit: &str) -> Result<Option<ImageManifest>, StoreError>;

  /// Commit holding the unpacked layer with this digest.
  fn layer_commit(&self, digest: &str) -> Result<String, StoreError>;

  /// Union-checkout one commit's tree into `dest`, processing whiteouts.
  fn checkout_layer(&self, commit: &str, dest: &Path) -> Result<(), StoreError>;

  /// Read one file of a commit's tree. `Ok(None)` when it is absent.
  fn read_layer_file(&self, commit: &str, path: &Path) -> Result<Option<Vec<u8>>, StoreError>;

  /// Whether anything (file, directory, whiteout marker) exists at `path`.
  fn layer_has_path(&self, commit: &str, path: &Path) -> Result<bool, StoreError>;

  fn list_images(&self, include_untagged: bool) -> Result<Vec<ImageInfo>, StoreError>;

  fn inspect(&self, image: &str) -> Result<ImageInfo, StoreError>;

  /// Remove the ref(s) of an image. Objects are reclaimed by [`prune`](Self::prune).
  fn delete_image(&self, image: &str) -> Result<Vec<String>, StoreError>;

  fn prune(&self) -> Result<StorePruneStats, StoreError>;

  fn virtual_size(&self, commit: &str) -> Result<Option<u64>, StoreError> {
    Ok(self.manifest(commit)?.and_then(|m| m.virtual_size()))
  }
}

/// An image resolved to a single immutable commit.
#[derive(Debug, Clone)]
pub struct Revision {
  /// The name as the user supplied it.
  pub image: String,
  pub branch: String,
  pub commit: String,
  /// Manifest image id, falling back to the commit id.
  pub image_id: String,
  pub manifest: Option<ImageManifest>,
}

impl Revision {
  /// Resolve `image` to exactly one revision.
  pub fn resolve(store: &dyn ContentStore, image: &str) -> Result<Self, StoreError> {
    let mut resolved = store.resolve(image, false)?;
    let ResolvedImage { branch, commit } = resolved
      .pop()
      .ok_or_else(|| StoreError::NotFound(image.to_string()))?;
    let manifest = store.manifest(&commit)?;
    let image_id = manifest
      .as_ref()
      .and_then(|m| m.image_id.clone())
      .unwrap_or_else(|| commit.clone());

    Ok(Self {
      image: image.to_string(),
      branch,
      commit,
      image_id,
      manifest,
    })
  }

  /// Commits to check out, base layer first. An image without a manifest is
  /// a single tree.
  pub fn layer_commits(&self, store: &dyn ContentStore) -> Result<Vec<String>, StoreError> {
    match &self.manifest {
      Some(manifest) => manifest.layer_digests().map(|d| store.layer_commit(d)).collect(),
      None => Ok(vec![self.commit.clone()]),
    }
  }
}

/// Read a file as it would appear after checking out `layers` (base first),
/// honoring whiteouts and opaque directories in upper layers.
///
/// A layer hides the file from the layers below it when it whites out the
/// file or any of its ancestor directories, or marks any ancestor opaque.
pub fn read_image_file(
  store: &dyn ContentStore,
  layers: &[String],
  path: &Path,
) -> Result<Option<Vec<u8>>, StoreError> {
  if path.file_name().is_none() {
    return Ok(None);
  }
  let markers = hiding_markers(path);

  for commit in layers.iter().rev() {
    if let Some(content) = store.read_layer_file(commit, path)? {
      return Ok(Some(content));
    }
    for marker in &markers {
      if store.layer_has_path(commit, marker)? {
        return Ok(None);
      }
    }
  }
  Ok(None)
}

/// Whiteout and opaque markers that would hide `path`, outermost first.
fn hiding_markers(path: &Path) -> Vec<PathBuf> {
  let components: Vec<_> = path.components().collect();
  let mut markers = Vec::new();
  let mut dir = PathBuf::new();
  for (i, component) in components.iter().enumerate() {
    let name = component.as_os_str().to_string_lossy();
    markers.push(dir.join(format!("{}{}", WHITEOUT_PREFIX, name)));
    dir.push(component);
    if i + 1 < components.len() {
      markers.push(dir.join(OPAQUE_MARKER));
    }
  }
  markers
}
