//! Directory-backed content store.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::reference::{decode_ref, image_branch, is_digest, layer_branch, layer_id};
use super::tree::{checkout_union, copy_tree};
use super::{ContentStore, ImageInfo, ImageManifest, ResolvedImage, StoreError, StorePruneStats};
use crate::consts::OCI_IMAGE_PREFIX;
use crate::util::fs::{dir_size, lexists, remove_any, write_atomic};
use crate::util::hash::{hash_bytes, hash_directory};

const COMMIT_FILENAME: &str = "commit.json";
const STAGING_PREFIX: &str = ".staging-";

/// Metadata attached to a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
  /// Manifest JSON, on image commits.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manifest: Option<String>,

  /// Layer digest, on layer commits.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub layer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitRecord {
  created: u64,
  #[serde(default)]
  metadata: CommitMetadata,
}

fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// A content store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsRepo {
  root: PathBuf,
}

impl FsRepo {
  /// Open (creating if needed) a repository at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let repo = Self { root: root.into() };
    for dir in [repo.refs_dir().join(OCI_IMAGE_PREFIX), repo.objects_dir()] {
      fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
    }
    Ok(repo)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn refs_dir(&self) -> PathBuf {
    self.root.join("refs")
  }

  fn objects_dir(&self) -> PathBuf {
    self.root.join("objects")
  }

  fn ref_path(&self, branch: &str) -> PathBuf {
    self.refs_dir().join(branch)
  }

  fn object_dir(&self, commit: &str) -> PathBuf {
    self.objects_dir().join(commit)
  }

  fn tree_dir(&self, commit: &str) -> PathBuf {
    self.object_dir(commit).join("tree")
  }

  /// Commit a ref points at, if the ref exists.
  pub fn resolve_rev(&self, branch: &str) -> Result<Option<String>, StoreError> {
    let path = self.ref_path(branch);
    match fs::read_to_string(&path) {
      Ok(content) => Ok(Some(content.trim().to_string())),
      Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => Ok(None),
      Err(e) if path.is_dir() => {
        debug!(branch, error = %e, "ref path is a directory");
        Ok(None)
      }
      Err(e) => Err(StoreError::Io { path, source: e }),
    }
  }

  /// Point `branch` at `commit`, or delete it when `commit` is `None`.
  pub fn set_ref(&self, branch: &str, commit: Option<&str>) -> Result<(), StoreError> {
    let path = self.ref_path(branch);
    match commit {
      Some(commit) => {
        if let Some(parent) = path.parent() {
          fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
        }
        write_atomic(&path, commit.as_bytes()).map_err(StoreError::io(&path))
      }
      None => remove_any(&path).map_err(StoreError::io(&path)),
    }
  }

  /// All refs, as `/`-separated names relative to `refs/`.
  pub fn list_refs(&self) -> Result<Vec<String>, StoreError> {
    let refs_dir = self.refs_dir();
    let mut refs = Vec::new();
    for entry in WalkDir::new(&refs_dir).sort_by_file_name().min_depth(1) {
      let entry = entry.map_err(|e| StoreError::io(&refs_dir)(e.into()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry.path().strip_prefix(&refs_dir).unwrap_or(entry.path());
      let name = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
      refs.push(name);
    }
    Ok(refs)
  }

  fn load_commit(&self, commit: &str) -> Result<CommitRecord, StoreError> {
    let path = self.object_dir(commit).join(COMMIT_FILENAME);
    let content = fs::read_to_string(&path).map_err(StoreError::io(&path))?;
    serde_json::from_str(&content).map_err(|e| StoreError::CorruptCommit {
      commit: commit.to_string(),
      message: e.to_string(),
    })
  }

  /// Commit a tree (or an empty tree) with metadata. Returns the commit id.
  ///
  /// The id is derived from the tree hash and the metadata, so committing the
  /// same content twice yields the same commit.
  pub fn commit_tree(&self, src: Option<&Path>, metadata: CommitMetadata) -> Result<String, StoreError> {
    let staging = self
      .objects_dir()
      .join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
    let tree = staging.join("tree");

    let result = self.stage_commit(src, &tree, metadata, &staging);
    if result.is_err() {
      let _ = remove_any(&staging);
    }
    result
  }

  fn stage_commit(
    &self,
    src: Option<&Path>,
    tree: &Path,
    metadata: CommitMetadata,
    staging: &Path,
  ) -> Result<String, StoreError> {
    match src {
      Some(src) => copy_tree(src, tree).map_err(StoreError::io(src))?,
      None => fs::create_dir_all(tree).map_err(StoreError::io(tree))?,
    }

    let tree_hash = hash_directory(tree).map_err(|source| StoreError::Hash {
      path: tree.to_path_buf(),
      source,
    })?;
    let meta_json = serde_json::to_string(&metadata).map_err(StoreError::Serialize)?;
    let commit = hash_bytes(format!("{}\n{}", tree_hash, meta_json).as_bytes()).0;

    let target = self.object_dir(&commit);
    if target.exists() {
      debug!(commit = %commit, "commit already present");
      remove_any(staging).map_err(StoreError::io(staging))?;
      return Ok(commit);
    }

    let record = CommitRecord {
      created: now_secs(),
      metadata,
    };
    let content = serde_json::to_string_pretty(&record).map_err(StoreError::Serialize)?;
    let record_path = staging.join(COMMIT_FILENAME);
    fs::write(&record_path, content).map_err(StoreError::io(&record_path))?;
    fs::rename(staging, &target).map_err(StoreError::io(&target))?;

    Ok(commit)
  }

  /// Import an image-layout directory:
  ///
  /// ```text
  /// <dir>/manifest.json
  /// <dir>/layers/<hex digest>/...   # unpacked layer trees
  /// ```
  ///
  /// Layers already in the store are skipped.
  pub fn import_image(&self, layout: &Path, image: &str) -> Result<ResolvedImage, StoreError> {
    let manifest_path = layout.join("manifest.json");
    let text = fs::read_to_string(&manifest_path).map_err(StoreError::io(&manifest_path))?;
    let manifest = ImageManifest::parse(&text).map_err(|source| StoreError::InvalidManifest {
      image: image.to_string(),
      source,
    })?;

    let mut imported = 0;
    for digest in manifest.layer_digests() {
      let branch = layer_branch(digest);
      if self.resolve_rev(&branch)?.is_some() {
        debug!(layer = %digest, "layer already in store");
        continue;
      }

      let src = layout.join("layers").join(layer_id(digest));
      if !src.is_dir() {
        return Err(StoreError::LayerMissing(digest.to_string()));
      }

      let commit = self.commit_tree(
        Some(&src),
        CommitMetadata {
          layer: Some(digest.to_string()),
          ..Default::default()
        },
      )?;
      self.set_ref(&branch, Some(&commit))?;
      imported += 1;
    }

    let commit = self.commit_tree(
      None,
      CommitMetadata {
        manifest: Some(text),
        ..Default::default()
      },
    )?;
    let branch = image_branch(image);
    self.set_ref(&branch, Some(&commit))?;

    info!(image, branch = %branch, layers = imported, "imported image");
    Ok(ResolvedImage { branch, commit })
  }

  fn inspect_branch(&self, branch: &str) -> Result<ImageInfo, StoreError> {
    let commit = self
      .resolve_rev(branch)?
      .ok_or_else(|| StoreError::NotFound(branch.to_string()))?;
    let record = self.load_commit(&commit)?;
    let branch_id = decode_ref(branch.strip_prefix(OCI_IMAGE_PREFIX).unwrap_or(branch));

    let mut image_id = commit.clone();
    let mut id = None;
    let tag = if is_digest(&branch_id) {
      image_id = branch_id.clone();
      "<none>".to_string()
    } else if let Some((name, hex)) = branch_id.rsplit_once("@sha256:") {
      id = Some(branch_id.clone());
      format!("{}:{}", name, hex)
    } else {
      branch_id.clone()
    };

    let manifest = self.manifest_of(&commit, &record)?;
    let (labels, virtual_size) = match &manifest {
      Some(manifest) => {
        if let Some(manifest_id) = &manifest.image_id {
          image_id = manifest_id.clone();
        }
        (manifest.labels.clone(), manifest.virtual_size())
      }
      None => (BTreeMap::new(), None),
    };

    Ok(ImageInfo {
      id: id.unwrap_or_else(|| image_id.clone()),
      image_id,
      version: tag.clone(),
      repo_tags: vec![tag],
      created: record.created,
      labels,
      commit,
      branch: branch.to_string(),
      virtual_size,
    })
  }

  fn manifest_of(&self, commit: &str, record: &CommitRecord) -> Result<Option<ImageManifest>, StoreError> {
    record
      .metadata
      .manifest
      .as_deref()
      .map(|text| {
        ImageManifest::parse(text).map_err(|source| StoreError::InvalidManifest {
          image: commit.to_string(),
          source,
        })
      })
      .transpose()
  }
}

fn is_valid_encoding(tail: &str) -> bool {
  tail
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

impl ContentStore for FsRepo {
  fn resolve(&self, image: &str, allow_multiple: bool) -> Result<Vec<ResolvedImage>, StoreError> {
    let branch = image_branch(image);
    if let Some(commit) = self.resolve_rev(&branch)? {
      return Ok(vec![ResolvedImage { branch, commit }]);
    }

    // Not a ref: accept a unique image-id prefix among tagged images.
    if image.is_empty() || !image.chars().all(|c| c.is_ascii_alphanumeric()) {
      return Err(StoreError::NotFound(image.to_string()));
    }

    let matches: Vec<ImageInfo> = self
      .list_images(true)?
      .into_iter()
      .filter(|i| i.is_tagged() && i.image_id.starts_with(image))
      .collect();

    match matches.len() {
      0 => Err(StoreError::NotFound(image.to_string())),
      n if n > 1 && !allow_multiple => Err(StoreError::Ambiguous {
        prefix: image.to_string(),
        matches: matches.iter().map(|i| i.version.clone()).collect(),
      }),
      _ => Ok(
        matches
          .into_iter()
          .map(|i| ResolvedImage {
            branch: i.branch,
            commit: i.commit,
          })
          .collect(),
      ),
    }
  }

  fn manifest(&self, commit: &str) -> Result<Option<ImageManifest>, StoreError> {
    let record = self.load_commit(commit)?;
    self.manifest_of(commit, &record)
  }

  fn layer_commit(&self, digest: &str) -> Result<String, StoreError> {
    self
      .resolve_rev(&layer_branch(digest))?
      .ok_or_else(|| StoreError::LayerMissing(digest.to_string()))
  }

  fn checkout_layer(&self, commit: &str, dest: &Path) -> Result<(), StoreError> {
    let tree = self.tree_dir(commit);
    if !tree.is_dir() {
      return Err(StoreError::CorruptCommit {
        commit: commit.to_string(),
        message: "missing tree".to_string(),
      });
    }
    debug!(commit, dest = %dest.display(), "checking out layer");
    checkout_union(&tree, dest).map_err(StoreError::io(dest))
  }

  fn read_layer_file(&self, commit: &str, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    let full = self.tree_dir(commit).join(path);
    match fs::symlink_metadata(&full) {
      Ok(meta) if meta.is_file() => fs::read(&full).map(Some).map_err(StoreError::io(&full)),
      Ok(_) => Ok(None),
      Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => Ok(None),
      Err(e) => Err(StoreError::Io { path: full, source: e }),
    }
  }

  fn layer_has_path(&self, commit: &str, path: &Path) -> Result<bool, StoreError> {
    Ok(lexists(&self.tree_dir(commit).join(path)))
  }

  fn list_images(&self, include_untagged: bool) -> Result<Vec<ImageInfo>, StoreError> {
    self
      .list_refs()?
      .iter()
      .filter_map(|r| r.strip_prefix(OCI_IMAGE_PREFIX).map(|tail| (r, tail)))
      .filter(|(_, tail)| include_untagged || !is_digest(tail))
      .map(|(r, _)| self.inspect_branch(r))
      .collect()
  }

  fn inspect(&self, image: &str) -> Result<ImageInfo, StoreError> {
    if image.starts_with(OCI_IMAGE_PREFIX) {
      return self.inspect_branch(image);
    }
    let resolved = self.resolve(image, true)?;
    let first = resolved
      .first()
      .ok_or_else(|| StoreError::NotFound(image.to_string()))?;
    self.inspect_branch(&first.branch)
  }

  fn delete_image(&self, image: &str) -> Result<Vec<String>, StoreError> {
    let resolved = self.resolve(image, false)?;
    let mut deleted = Vec::new();
    for ResolvedImage { branch, .. } in resolved {
      self.set_ref(&branch, None)?;
      info!(branch = %branch, "deleted image ref");
      deleted.push(branch);
    }
    Ok(deleted)
  }

  fn prune(&self) -> Result<StorePruneStats, StoreError> {
    let mut stats = StorePruneStats::default();
    let mut layer_refs: BTreeMap<String, bool> = BTreeMap::new();
    let mut image_refs = Vec::new();

    for r in self.list_refs()? {
      let Some(tail) = r.strip_prefix(OCI_IMAGE_PREFIX) else {
        continue;
      };
      if is_digest(tail) || !is_valid_encoding(tail) {
        layer_refs.insert(r.clone(), false);
      } else {
        image_refs.push(r.clone());
      }
    }

    for branch in &image_refs {
      let Some(commit) = self.resolve_rev(branch)? else {
        continue;
      };
      if let Some(manifest) = self.manifest(&commit)? {
        for digest in manifest.layer_digests() {
          layer_refs.insert(layer_branch(digest), true);
        }
      }
    }

    for (branch, live) in layer_refs {
      if live || self.resolve_rev(&branch)?.is_none() {
        continue;
      }
      self.set_ref(&branch, None)?;
      debug!(branch = %branch, "deleted unreferenced ref");
      stats.refs_deleted += 1;
      stats.deleted_refs.push(branch);
    }

    let mut live_commits = std::collections::HashSet::new();
    for r in self.list_refs()? {
      if let Some(commit) = self.resolve_rev(&r)? {
        live_commits.insert(commit);
      }
    }

    let objects = self.objects_dir();
    let entries = fs::read_dir(&objects).map_err(StoreError::io(&objects))?;
    for entry in entries {
      let entry = entry.map_err(StoreError::io(&objects))?;
      let name = entry.file_name().to_string_lossy().into_owned();
      if live_commits.contains(&name) {
        continue;
      }
      let path = entry.path();
      let size = dir_size(&path);
      remove_any(&path).map_err(StoreError::io(&path))?;
      if !name.starts_with(STAGING_PREFIX) {
        stats.objects_deleted += 1;
      }
      stats.bytes_freed += size;
    }

    info!(
      refs_deleted = stats.refs_deleted,
      objects_deleted = stats.objects_deleted,
      bytes_freed = stats.bytes_freed,
      "store pruned"
    );
    Ok(stats)
  }
}
