//! The checkout pipeline shared by install and upgrade.
//!
//! Everything a checkout writes before the symlink swap is undone by
//! [`CheckoutGuard`] if the checkout fails: the slot directory, host files
//! it installed and the unit files it copied to the host. On upgrade the
//! previous deployment's host files, units and running service are put back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use super::Context;
use super::layout::{Layout, ROOTFS_DIR, Slot};
use super::state::CheckoutPhase;
use crate::error::Error;
use crate::exports::{EXPORTS_DIR, ImageExports};
use crate::hostfiles::{self, Checksums, ReconcileTarget};
use crate::info::{INFO_SCHEMA_VERSION, InfoRecord, SystemPackage};
use crate::package::PackageRequest;
use crate::rootfs;
use crate::store::Revision;
use crate::template;
use crate::unit::{self, GeneratedUnits};
use crate::util::fs::{lexists, remove_any, symlink};
use crate::values::{self, ValueContext, ValueMap};

/// The deployment being replaced by an upgrade.
#[derive(Debug, Clone)]
pub(crate) struct Previous {
  pub slot: Slot,
  pub info: InfoRecord,
  pub was_active: bool,
}

pub(crate) struct CheckoutPlan<'a> {
  pub layout: &'a Layout,
  pub slot: Slot,
  pub revision: &'a Revision,
  pub exports: &'a ImageExports,
  /// Values layered over the manifest defaults.
  pub overrides: &'a BTreeMap<String, String>,
  /// Host files of the previous deployment.
  pub baseline: &'a Checksums,
  pub previous: Option<&'a Previous>,
  /// `Yes` or `No`.
  pub package: SystemPackage,
  pub remote: Option<&'a Path>,
}

#[derive(Debug)]
pub(crate) struct CheckoutResult {
  pub info: InfoRecord,
  pub values: ValueMap,
}

/// The directory an install with `--remote=<dir>` uses as rootfs.
pub(crate) fn remote_rootfs(remote: &Path) -> Result<PathBuf, Error> {
  let nested = remote.join(ROOTFS_DIR);
  let rootfs = if nested.is_dir() { nested } else { remote.to_path_buf() };
  if !rootfs.is_dir() {
    return Err(Error::InvalidArgument(format!(
      "remote rootfs {} does not exist",
      remote.display()
    )));
  }
  Ok(rootfs)
}

/// Resolve `image` and read its exports, from the store or from the remote
/// rootfs.
pub(crate) fn prepare(ctx: &Context, image: &str, remote: Option<&Path>) -> Result<(Revision, ImageExports), Error> {
  debug!(image = %image, phase = %CheckoutPhase::Resolving, "checkout phase");
  let revision = Revision::resolve(ctx.store.as_ref(), image)?;
  let exports = match remote {
    Some(rootfs) => ImageExports::from_dir(image, &rootfs.join(EXPORTS_DIR))?,
    None => {
      let layers = revision.layer_commits(ctx.store.as_ref())?;
      ImageExports::from_store(ctx.store.as_ref(), image, &layers)?
    }
  };
  Ok((revision, exports))
}

/// Fail with [`Error::MissingValues`] when a template references a variable
/// nothing provides.
pub(crate) fn preflight(exports: &ImageExports, image: &str, overrides: &BTreeMap<String, String>) -> Result<(), Error> {
  let referenced = exports.referenced_variables()?;
  let missing = values::missing_variables(&referenced, &exports.manifest.default_values, overrides);
  if missing.is_empty() {
    Ok(())
  } else {
    Err(Error::MissingValues {
      image: image.to_string(),
      variables: missing,
    })
  }
}

/// `rpm.spec` from the image, rendering `rpm.spec.template` if present.
pub(crate) fn rpm_spec(exports: &ImageExports, values: &ValueMap) -> Result<Option<String>, Error> {
  Ok(match (&exports.rpm_spec_template, &exports.rpm_spec) {
    (Some(text), _) => Some(template::substitute("rpm.spec.template", text, values)?),
    (None, Some(spec)) => Some(spec.clone()),
    (None, None) => None,
  })
}

fn now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// Staged configuration of a slot.
pub(crate) struct Configured {
  pub values: ValueMap,
  pub units: GeneratedUnits,
  pub rename: BTreeMap<String, String>,
  pub spec: Option<String>,
}

/// Inputs for [`configure`].
#[derive(Clone, Copy)]
pub(crate) struct ConfigureRequest<'a> {
  pub name: &'a str,
  pub revision: &'a Revision,
  pub exports: &'a ImageExports,
  pub overrides: &'a BTreeMap<String, String>,
  pub slot_dir: &'a Path,
  /// Where the deployment lives on the target host.
  pub destdir: &'a Path,
  pub remote: Option<&'a Path>,
}

/// Compute values, write `config.json` and render units into the slot.
pub(crate) fn configure(ctx: &Context, req: &ConfigureRequest) -> Result<Configured, Error> {
  let ConfigureRequest {
    name,
    revision,
    exports,
    overrides,
    slot_dir,
    destdir,
    remote,
  } = *req;
  let values = values::resolve(
    &exports.manifest.default_values,
    overrides,
    &ValueContext {
      name,
      destdir,
      image_name: &revision.image,
      image_id: &revision.image_id,
      host: &ctx.host,
      features: &ctx.features,
    },
  );

  let config = unit::write_config(slot_dir, exports, &values, &ctx.features, remote)?;
  let sources = unit::check_config(&config, remote.is_some())?;
  let missing = unit::missing_bind_sources(&sources, &ctx.config.sysroot);
  let units = unit::render(exports, &values, &missing, ctx.host.uid, ctx.host.gid)?;
  let rename = hostfiles::render_renames(&exports.manifest.rename_files, &values)?;
  let spec = rpm_spec(exports, &values)?;
  if let Some(spec) = &spec {
    let path = slot_dir.join("rpm.spec");
    fs::write(&path, spec).map_err(Error::io(&path))?;
  }

  Ok(Configured {
    values,
    units,
    rename,
    spec,
  })
}

/// Undoes a failed checkout when dropped while armed.
struct CheckoutGuard<'a> {
  ctx: &'a Context,
  layout: &'a Layout,
  slot: Slot,
  phase: CheckoutPhase,
  installed: Checksums,
  host_units_written: bool,
  previous: Option<&'a Previous>,
  armed: bool,
}

impl<'a> CheckoutGuard<'a> {
  fn new(ctx: &'a Context, layout: &'a Layout, slot: Slot, previous: Option<&'a Previous>) -> Self {
    Self {
      ctx,
      layout,
      slot,
      phase: CheckoutPhase::Resolving,
      installed: Checksums::new(),
      host_units_written: false,
      previous,
      armed: true,
    }
  }

  fn advance(&mut self, phase: CheckoutPhase) {
    debug!(name = %self.layout.name(), slot = %self.slot, phase = %phase, "checkout phase");
    self.phase = phase;
  }

  fn disarm(&mut self) {
    self.armed = false;
    self.advance(CheckoutPhase::Activated);
  }

  fn cleanup(&mut self) {
    let name = self.layout.name();
    let failed_at = self.phase;
    self.phase = CheckoutPhase::Failed;
    warn!(name = %name, slot = %self.slot, phase = %failed_at, "checkout failed, cleaning up");

    let host_units = self.ctx.host_units(name);
    if self.host_units_written {
      if let Err(e) = host_units.remove() {
        warn!(name = %name, error = %e, "failed to remove unit files");
      }
      if let Some(previous) = self.previous
        && let Err(e) = host_units.install_from(&self.layout.slot_units(previous.slot))
      {
        warn!(name = %name, error = %e, "failed to restore previous unit files");
      }
    }

    for logical in self.installed.keys() {
      let path = hostfiles::host_path(&self.ctx.config.sysroot, logical);
      if let Err(e) = remove_any(&path) {
        warn!(path = %path.display(), error = %e, "failed to remove installed host file");
      }
    }

    if let Some(previous) = self.previous {
      if failed_at.touched_host() && previous.info.rpm_installed.is_none() {
        self.restore_previous_files(previous);
      }
      if host_units.tmpfiles.exists()
        && let Err(e) = self.ctx.services.tmpfiles_create(&host_units.tmpfiles)
      {
        warn!(name = %name, error = %e, "failed to recreate previous tmpfiles");
      }
      if previous.was_active
        && let Err(e) = self.ctx.services.start(name)
      {
        warn!(name = %name, error = %e, "failed to restart previous service");
      }
    }

    let slot_dir = self.layout.slot_dir(self.slot);
    if let Err(e) = remove_any(&slot_dir) {
      warn!(path = %slot_dir.display(), error = %e, "failed to remove checkout");
    }

    self.phase = CheckoutPhase::CleanedUp;
    info!(name = %name, phase = %self.phase, "checkout cleanup finished");
  }

  fn restore_previous_files(&self, previous: &Previous) {
    let exports = self.layout.rootfs(previous.slot).join(EXPORTS_DIR);
    if !exports.is_dir() {
      debug!(name = %self.layout.name(), "previous exports not available, host files not restored");
      return;
    }
    let values = ValueMap::from(previous.info.values.clone());
    let target = ReconcileTarget {
      prefix: &self.ctx.config.sysroot,
      rename: &previous.info.rename_installed_files,
      templates: &previous.info.installed_files_template,
      values: &values,
      use_links: previous.info.use_links,
    };
    match hostfiles::restore(&exports, &target) {
      Ok(restored) => debug!(files = restored.len(), "previous host files restored"),
      Err(e) => warn!(error = %e, "failed to restore previous host files"),
    }
  }
}

impl Drop for CheckoutGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      self.cleanup();
    }
  }
}

/// Stage `plan.slot`, reconcile host files, register units and swap the
/// symlink. Service manager activation (package install, reload, tmpfiles,
/// enable) follows the swap and is not undone.
pub(crate) fn checkout(ctx: &Context, plan: CheckoutPlan) -> Result<CheckoutResult, Error> {
  let layout = plan.layout;
  let name = layout.name();
  let slot_dir = layout.slot_dir(plan.slot);
  let mut guard = CheckoutGuard::new(ctx, layout, plan.slot, plan.previous);

  guard.advance(CheckoutPhase::Staging);
  if lexists(&slot_dir) {
    debug!(path = %slot_dir.display(), "removing stale checkout");
    remove_any(&slot_dir).map_err(Error::io(&slot_dir))?;
  }
  fs::create_dir_all(&slot_dir).map_err(Error::io(&slot_dir))?;
  let rootfs = layout.rootfs(plan.slot);
  match plan.remote {
    Some(remote) => symlink(remote, &rootfs).map_err(Error::io(&rootfs))?,
    None => {
      rootfs::materialize(ctx.store.as_ref(), plan.revision, &rootfs)?;
    }
  }

  guard.advance(CheckoutPhase::Configuring);
  let configured = configure(
    ctx,
    &ConfigureRequest {
      name,
      revision: plan.revision,
      exports: plan.exports,
      overrides: plan.overrides,
      slot_dir: &slot_dir,
      destdir: &slot_dir,
      remote: plan.remote,
    },
  )?;
  let values = &configured.values;

  let exports_dir = rootfs.join(EXPORTS_DIR);
  let target = ReconcileTarget {
    prefix: &ctx.config.sysroot,
    rename: &configured.rename,
    templates: &plan.exports.manifest.installed_files_template,
    values,
    use_links: ctx.config.use_links,
  };
  let mut package = None;
  if plan.package == SystemPackage::Yes {
    let labels = plan.revision.manifest.as_ref().map(|m| m.labels.clone()).unwrap_or_default();
    let request = PackageRequest {
      name,
      image_id: &plan.revision.image_id,
      labels: &labels,
      exports: Some(&exports_dir),
      spec: configured.spec.as_deref(),
      rename: &configured.rename,
      templates: &plan.exports.manifest.installed_files_template,
      values,
      deployment: None,
      units: None,
    };
    package = Some(ctx.packager.build(&request, &slot_dir)?);
    hostfiles::remove_installed(plan.baseline, &ctx.config.sysroot)?;
  } else {
    guard.installed = hostfiles::reconcile(plan.baseline, Some(&exports_dir), &target)?;
  }
  guard.advance(CheckoutPhase::FilesReconciled);

  let slot_units = layout.slot_units(plan.slot);
  slot_units.write(&configured.units)?;

  let has_service = plan.exports.has_container_service();
  let info = InfoRecord {
    schema_version: INFO_SCHEMA_VERSION,
    image: plan.revision.image.clone(),
    revision: plan.revision.image_id.clone(),
    content_store_commit: plan.revision.commit.clone(),
    created: now(),
    values: values.as_map().clone(),
    has_container_service: has_service,
    installed_files_checksum: guard.installed.clone(),
    installed_files_template: plan.exports.manifest.installed_files_template.clone(),
    rename_installed_files: configured.rename.clone(),
    rpm_installed: package
      .as_ref()
      .and_then(|p| p.file_name())
      .map(|f| f.to_string_lossy().into_owned()),
    system_package: plan.package,
    remote: plan.remote.map(|r| r.display().to_string()),
    use_links: ctx.config.use_links,
    runtime: ctx.features.runtime,
  };
  info.save(&slot_dir)?;

  if !has_service && plan.remote.is_none() {
    debug!(name = %name, "no container service, dropping the checked out rootfs");
    remove_any(&rootfs).map_err(Error::io(&rootfs))?;
  }
  rootfs::sync_dir(&slot_dir)?;
  guard.advance(CheckoutPhase::UnitRegistered);

  let host_units = ctx.host_units(name);
  guard.host_units_written = true;
  host_units.remove()?;
  host_units.install_from(&slot_units)?;
  layout.activate(plan.slot)?;
  guard.disarm();
  info!(name = %name, slot = %plan.slot, image = %plan.revision.image, "deployment activated");

  if let Some(package) = &package {
    ctx.packager.install(package)?;
  }
  ctx.services.daemon_reload()?;
  if host_units.tmpfiles.exists() {
    ctx.services.tmpfiles_create(&host_units.tmpfiles)?;
  }
  if has_service && plan.previous.is_none_or(|p| !p.info.has_container_service) {
    ctx.services.enable(name)?;
  }

  Ok(CheckoutResult {
    values: configured.values,
    info,
  })
}
