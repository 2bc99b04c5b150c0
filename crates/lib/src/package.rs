//! Packaging a deployment's host files for the host package manager.
//!
//! Images that ship `rpm.spec`, `rpm.spec.template` or `exports/hostfs` can be
//! installed as an rpm so the package manager owns their host files. The
//! package root is staged in a temporary directory and built with
//! `rpmbuild`; installation goes through `dnf` (or `yum`) and is refused on
//! ostree-booted hosts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::{APP_NAME, OSTREE_BOOTED_MARKER, RPM_NAME_PREFIX};
use crate::hostfiles::{self, Checksums, HostFileError, ReconcileTarget};
use crate::store::tree::copy_tree;
use crate::unit::{GeneratedUnits, host_tmpfiles_filename, unit_filename};
use crate::util::process::{self, CommandError};
use crate::values::ValueMap;

/// A prebuilt package an image may ship instead of being packaged.
pub const INCLUDED_PACKAGE: &str = "container.rpm";

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("cannot install packages on an ostree-booted host")]
  OstreeBooted,

  #[error("packaging {0} produced no package file")]
  NothingBuilt(String),

  #[error("failed to stage package contents at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  HostFiles(#[from] HostFileError),

  #[error(transparent)]
  Command(#[from] CommandError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
  move |source| PackageError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Package name for a deployment.
pub fn package_name(name: &str) -> String {
  format!("{}-{}", RPM_NAME_PREFIX, name)
}

/// Everything needed to package one deployment.
#[derive(Debug, Clone, Copy)]
pub struct PackageRequest<'a> {
  pub name: &'a str,
  pub image_id: &'a str,
  /// Image labels; `summary`, `version`, `release`, `license`, `url`,
  /// `source0`, `requires`, `provides`, `conflicts` and `description` feed
  /// the generated spec (case-insensitive).
  pub labels: &'a BTreeMap<String, String>,
  /// Checked-out `exports/` directory.
  pub exports: Option<&'a Path>,
  /// Spec from the image (`rpm.spec`, or rendered `rpm.spec.template`).
  pub spec: Option<&'a str>,
  pub rename: &'a BTreeMap<String, String>,
  pub templates: &'a [String],
  pub values: &'a ValueMap,
  /// Deployment directory shipped under `/usr/lib/containers/hostctr/<name>`.
  pub deployment: Option<&'a Path>,
  /// Units shipped under `/usr/lib/systemd/system` and `/usr/lib/tmpfiles.d`.
  pub units: Option<&'a GeneratedUnits>,
}

/// Builds and (un)installs packages. Faked in tests.
pub trait Packager {
  /// Build the package and move it into `dest_dir`. Returns its path.
  fn build(&self, request: &PackageRequest, dest_dir: &Path) -> Result<PathBuf, PackageError>;
  fn install(&self, package: &Path) -> Result<(), PackageError>;
  /// Remove an installed package by name.
  fn uninstall(&self, package: &str) -> Result<(), PackageError>;
}

/// Package contents staged for `rpmbuild`.
#[derive(Debug)]
pub struct StagedPackage {
  pub dir: TempDir,
  pub root: PathBuf,
  pub spec_path: PathBuf,
  pub host_files: Checksums,
}

/// Where a packaged deployment is installed on the target host.
pub fn packaged_deployment_dir(name: &str) -> String {
  format!("/usr/lib/containers/{}/{}", APP_NAME, name)
}

/// Stage the package root and spec for `request` in a temporary directory.
pub fn stage(request: &PackageRequest) -> Result<StagedPackage, PackageError> {
  let dir = TempDir::new().map_err(io_err(Path::new("tmp")))?;
  let root = dir.path().join("rpmroot");
  fs::create_dir_all(&root).map_err(io_err(&root))?;

  let target = ReconcileTarget {
    prefix: &root,
    rename: request.rename,
    templates: request.templates,
    values: request.values,
    use_links: false,
  };
  let host_files = hostfiles::reconcile(&Checksums::new(), request.exports, &target)?;

  if let Some(deployment) = request.deployment {
    let dest = hostfiles::host_path(&root, &packaged_deployment_dir(request.name));
    copy_tree(deployment, &dest).map_err(io_err(&dest))?;
  }

  if let Some(units) = request.units {
    let placements = [
      (units.unit.as_ref(), "usr/lib/systemd/system", unit_filename(request.name)),
      (units.tmpfiles.as_ref(), "usr/lib/tmpfiles.d", host_tmpfiles_filename(request.name)),
    ];
    for (content, dir, file) in placements {
      if let Some(content) = content {
        let dest_dir = root.join(dir);
        fs::create_dir_all(&dest_dir).map_err(io_err(&dest_dir))?;
        let dest = dest_dir.join(file);
        fs::write(&dest, content).map_err(io_err(&dest))?;
      }
    }
  }

  let spec = match request.spec {
    Some(spec) => spec.to_string(),
    None => generate_spec(&root, request, &host_files),
  };
  let spec_path = dir.path().join("container.spec");
  fs::write(&spec_path, spec).map_err(io_err(&spec_path))?;

  Ok(StagedPackage {
    dir,
    root,
    spec_path,
    host_files,
  })
}

fn files_under(root: &Path, rel: &str) -> Vec<String> {
  let base = root.join(rel);
  if !base.is_dir() {
    return Vec::new();
  }
  let mut files: Vec<String> = WalkDir::new(&base)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| !e.file_type().is_dir())
    .filter_map(|e| e.path().strip_prefix(root).ok().map(|p| format!("/{}", p.display())))
    .collect();
  files.sort();
  files
}

/// Generate a spec listing the staged files. Files under `/etc` are marked
/// `%config`.
pub fn generate_spec(root: &Path, request: &PackageRequest, host_files: &Checksums) -> String {
  let labels: BTreeMap<String, &str> = request
    .labels
    .iter()
    .map(|(k, v)| (k.to_lowercase(), v.as_str()))
    .collect();
  let label = |key: &str| labels.get(key).copied();

  let mut spec = String::from(
    "%global __requires_exclude_from ^.*$\n%global __provides_exclude_from ^.*$\n%define _unpackaged_files_terminate_build 0\n",
  );

  let name = package_name(request.name);
  let fields = [
    ("Name", Some(name.as_str())),
    ("Version", Some(label("version").unwrap_or("1"))),
    ("Release", Some(label("release").unwrap_or(request.image_id))),
    ("Summary", Some(label("summary").unwrap_or(request.name))),
    ("License", Some(label("license").unwrap_or("GPLv2"))),
    ("URL", label("url")),
    ("Source0", label("source0")),
    ("Requires", label("requires")),
    ("Provides", label("provides")),
    ("Conflicts", label("conflicts")),
  ];
  for (key, value) in fields {
    if let Some(value) = value {
      spec.push_str(&format!("{}:\t{}\n", key, value));
    }
  }

  spec.push_str(&format!("\n%description\nImage ID: {}\n", request.image_id));
  if let Some(description) = label("description") {
    spec.push_str(description);
    spec.push('\n');
  }

  spec.push_str("\n%files\n");
  for file in files_under(root, "etc") {
    spec.push_str(&format!("%config \"{}\"\n", file));
  }
  if request.deployment.is_some() {
    spec.push_str(&packaged_deployment_dir(request.name));
    spec.push('\n');
  }
  for dir in ["usr/lib/systemd/system", "usr/lib/tmpfiles.d"] {
    for file in files_under(root, dir) {
      spec.push_str(&file);
      spec.push('\n');
    }
  }
  for file in host_files.keys().filter(|f| !f.starts_with("/etc/")) {
    if !spec.lines().any(|l| l == file.as_str()) {
      spec.push_str(file);
      spec.push('\n');
    }
  }
  spec
}

/// The first `.rpm` under `dir`.
pub fn find_package(dir: &Path) -> Option<PathBuf> {
  WalkDir::new(dir)
    .sort_by_file_name()
    .into_iter()
    .filter_map(Result::ok)
    .find(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "rpm"))
    .map(|e| e.into_path())
}

fn move_into(src: &Path, dest_dir: &Path) -> Result<PathBuf, PackageError> {
  let file_name = src.file_name().ok_or_else(|| PackageError::NothingBuilt(src.display().to_string()))?;
  let dest = dest_dir.join(file_name);
  fs::copy(src, &dest).map_err(io_err(&dest))?;
  Ok(dest)
}

/// `rpmbuild` plus `dnf`/`yum`.
#[derive(Debug, Clone)]
pub struct RpmPackager {
  ostree_marker: PathBuf,
}

impl Default for RpmPackager {
  fn default() -> Self {
    Self {
      ostree_marker: PathBuf::from(OSTREE_BOOTED_MARKER),
    }
  }
}

impl RpmPackager {
  pub fn with_ostree_marker(marker: impl Into<PathBuf>) -> Self {
    Self {
      ostree_marker: marker.into(),
    }
  }

  fn package_manager(&self) -> Result<&'static str, PackageError> {
    if self.ostree_marker.exists() {
      return Err(PackageError::OstreeBooted);
    }
    Ok(if Path::new("/usr/bin/dnf").exists() { "dnf" } else { "yum" })
  }
}

impl Packager for RpmPackager {
  fn build(&self, request: &PackageRequest, dest_dir: &Path) -> Result<PathBuf, PackageError> {
    if let Some(exports) = request.exports {
      let included = exports.join(INCLUDED_PACKAGE);
      if included.is_file() {
        debug!(path = %included.display(), "using the package shipped by the image");
        return move_into(&included, dest_dir);
      }
    }

    let staged = stage(request)?;
    let work = staged.dir.path();
    let build_dir = work.join("build");
    fs::create_dir_all(&build_dir).map_err(io_err(&build_dir))?;

    let define = |macro_name: &str, dir: &Path| format!("{} {}", macro_name, dir.display());
    let args = vec![
      "--noclean".to_string(),
      "-bb".to_string(),
      staged.spec_path.display().to_string(),
      "--define".to_string(),
      define("_sourcedir", work),
      "--define".to_string(),
      define("_specdir", work),
      "--define".to_string(),
      define("_builddir", work),
      "--define".to_string(),
      define("_srcrpmdir", work),
      "--define".to_string(),
      define("_rpmdir", &build_dir),
      "--build-in-place".to_string(),
      format!("--buildroot={}", staged.root.display()),
    ];
    process::run("rpmbuild", &args, Some(work))?;

    let built = find_package(&build_dir).ok_or_else(|| PackageError::NothingBuilt(request.name.to_string()))?;
    let dest = move_into(&built, dest_dir)?;
    info!(package = %dest.display(), "package built");
    Ok(dest)
  }

  fn install(&self, package: &Path) -> Result<(), PackageError> {
    let manager = self.package_manager()?;
    let package = package.display().to_string();
    process::run(manager, &["install", "-y", package.as_str()], None)?;
    info!(package = %package, "package installed");
    Ok(())
  }

  fn uninstall(&self, package: &str) -> Result<(), PackageError> {
    let manager = self.package_manager()?;
    let package = package.trim_end_matches(".rpm");
    process::run(manager, &["remove", "-y", package], None)?;
    info!(package = %package, "package removed");
    Ok(())
  }
}
