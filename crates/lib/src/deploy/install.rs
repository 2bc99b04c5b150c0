use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;

use super::checkout::{self, CheckoutPlan, ConfigureRequest};
use super::layout::{Layout, Slot};
use super::{ActivationMode, Engine, InstallOptions, InstallOutcome, validate_name};
use crate::error::Error;
use crate::exports::{EXPORTS_DIR, ImageExports};
use crate::hostfiles::Checksums;
use crate::info::SystemPackage;
use crate::package::{PackageRequest, packaged_deployment_dir};
use crate::rootfs;
use crate::store::Revision;

/// Settle the requested packaging mode for the caller. `Auto` is decided
/// once the image's exports are known.
fn check_package_mode(mode: SystemPackage, user: bool) -> Result<SystemPackage, Error> {
  match mode {
    SystemPackage::Auto if user => Ok(SystemPackage::No),
    SystemPackage::Build | SystemPackage::Yes if user => Err(Error::InvalidArgument(format!(
      "system-package={} needs a privileged installation",
      mode
    ))),
    SystemPackage::Absent => Ok(SystemPackage::No),
    other => Ok(other),
  }
}

impl Engine<'_> {
  /// Install `image` as deployment `name` in slot 0.
  pub fn install(&self, name: &str, image: &str, options: InstallOptions) -> Result<InstallOutcome, Error> {
    let ctx = self.ctx;
    validate_name(name)?;
    let mode = check_package_mode(options.system_package, ctx.host.user)?;

    let layout = ctx.layout(name);
    if mode != SystemPackage::Build && (layout.is_installed() || ctx.host_units(name).any_exists()) {
      return Err(Error::AlreadyExists(name.to_string()));
    }

    let remote = options.remote.as_deref().map(checkout::remote_rootfs).transpose()?;
    let (revision, exports) = checkout::prepare(ctx, image, remote.as_deref())?;
    checkout::preflight(&exports, image, &options.values)?;

    let package = match mode {
      SystemPackage::Auto if exports.wants_system_package() => SystemPackage::Yes,
      SystemPackage::Auto => SystemPackage::No,
      other => other,
    };

    if package == SystemPackage::Build {
      let dest = match options.package_dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(Error::io("."))?,
      };
      let built = self.build_package(name, &revision, &exports, &options.values, &dest)?;
      return Ok(InstallOutcome::PackageBuilt(built));
    }

    info!(name = %name, image = %image, package = %package, "installing");
    let slot = Slot::Zero;
    let result = checkout::checkout(
      ctx,
      CheckoutPlan {
        layout: &layout,
        slot,
        revision: &revision,
        exports: &exports,
        overrides: &options.values,
        baseline: &Checksums::new(),
        previous: None,
        package,
        remote: remote.as_deref(),
      },
    )?;

    let started = options.controlled && result.info.has_container_service;
    if started {
      self.start_service(name, ActivationMode::Controlled, || {
        self.uninstall(name).map(|_| ())
      })?;
    }

    Ok(InstallOutcome::Installed {
      slot,
      values: result.values,
      started,
    })
  }

  /// Package the whole deployment (rootfs, configuration, units and host
  /// files) without touching the host.
  fn build_package(
    &self,
    name: &str,
    revision: &Revision,
    exports: &ImageExports,
    overrides: &BTreeMap<String, String>,
    dest: &Path,
  ) -> Result<PathBuf, Error> {
    let ctx = self.ctx;
    let work = TempDir::new().map_err(Error::io(std::env::temp_dir()))?;
    let layout = Layout::new(work.path(), name);
    let slot_dir = layout.slot_dir(Slot::Zero);
    let rootfs = layout.rootfs(Slot::Zero);
    rootfs::materialize(ctx.store.as_ref(), revision, &rootfs)?;

    let destdir = PathBuf::from(packaged_deployment_dir(name));
    let configured = checkout::configure(
      ctx,
      &ConfigureRequest {
        name,
        revision,
        exports,
        overrides,
        slot_dir: &slot_dir,
        destdir: &destdir,
        remote: None,
      },
    )?;
    layout.slot_units(Slot::Zero).write(&configured.units)?;

    let labels = revision.manifest.as_ref().map(|m| m.labels.clone()).unwrap_or_default();
    let exports_dir = rootfs.join(EXPORTS_DIR);
    let request = PackageRequest {
      name,
      image_id: &revision.image_id,
      labels: &labels,
      exports: Some(&exports_dir),
      spec: configured.spec.as_deref(),
      rename: &configured.rename,
      templates: &exports.manifest.installed_files_template,
      values: &configured.values,
      deployment: Some(&slot_dir),
      units: Some(&configured.units),
    };
    let built = ctx.packager.build(&request, dest)?;
    info!(name = %name, package = %built.display(), "package generated");
    Ok(built)
  }
}
