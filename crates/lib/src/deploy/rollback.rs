use tracing::{debug, info, warn};

use super::layout::{Layout, Slot};
use super::{Context, Engine};
use crate::error::Error;
use crate::exports::EXPORTS_DIR;
use crate::hostfiles::{self, Checksums, ReconcileTarget};
use crate::info::InfoRecord;
use crate::package::package_name;
use crate::rootfs;
use crate::util::fs::remove_any;
use crate::values::ValueMap;

/// Puts the current deployment back when a rollback fails before the
/// previous slot is activated: unit files, host files, tmpfiles and the
/// service if it was running.
struct RollbackGuard<'a> {
  ctx: &'a Context,
  layout: &'a Layout,
  current: Slot,
  info: &'a InfoRecord,
  stopped: bool,
  units_swapped: bool,
  files_removed: bool,
  /// Files of the previous deployment installed by this rollback.
  restored: Checksums,
  armed: bool,
}

impl<'a> RollbackGuard<'a> {
  fn new(ctx: &'a Context, layout: &'a Layout, current: Slot, info: &'a InfoRecord) -> Self {
    Self {
      ctx,
      layout,
      current,
      info,
      stopped: false,
      units_swapped: false,
      files_removed: false,
      restored: Checksums::new(),
      armed: true,
    }
  }

  fn cleanup(&mut self) {
    let name = self.layout.name();
    warn!(name = %name, slot = %self.current, "rollback failed, restoring the current deployment");

    for logical in self.restored.keys() {
      let path = hostfiles::host_path(&self.ctx.config.sysroot, logical);
      if let Err(e) = remove_any(&path) {
        warn!(path = %path.display(), error = %e, "failed to remove restored host file");
      }
    }

    let host_units = self.ctx.host_units(name);
    if self.units_swapped {
      if let Err(e) = host_units.remove() {
        warn!(name = %name, error = %e, "failed to remove unit files");
      }
      if let Err(e) = host_units.install_from(&self.layout.slot_units(self.current)) {
        warn!(name = %name, error = %e, "failed to reinstall current unit files");
      }
    }

    if self.files_removed && self.info.rpm_installed.is_none() {
      self.restore_current_files();
    }

    if host_units.tmpfiles.exists()
      && let Err(e) = self.ctx.services.tmpfiles_create(&host_units.tmpfiles)
    {
      warn!(name = %name, error = %e, "failed to recreate tmpfiles");
    }
    if self.stopped
      && let Err(e) = self.ctx.services.start(name)
    {
      warn!(name = %name, error = %e, "failed to restart service");
    }

    info!(name = %name, slot = %self.current, "rollback cleanup finished");
  }

  fn restore_current_files(&self) {
    let exports = self.layout.rootfs(self.current).join(EXPORTS_DIR);
    if !exports.is_dir() {
      debug!(name = %self.layout.name(), "current exports not available, host files not restored");
      return;
    }
    let values = ValueMap::from(self.info.values.clone());
    let target = ReconcileTarget {
      prefix: &self.ctx.config.sysroot,
      rename: &self.info.rename_installed_files,
      templates: &self.info.installed_files_template,
      values: &values,
      use_links: self.info.use_links,
    };
    match hostfiles::restore(&exports, &target) {
      Ok(restored) => debug!(files = restored.len(), "current host files restored"),
      Err(e) => warn!(error = %e, "failed to restore current host files"),
    }
  }
}

impl Drop for RollbackGuard<'_> {
  fn drop(&mut self) {
    if self.armed {
      self.cleanup();
    }
  }
}

impl Engine<'_> {
  /// Switch `name` back to its previous deployment. Returns the slot now
  /// active.
  pub fn rollback(&self, name: &str) -> Result<Slot, Error> {
    self.rollback_deployment(name, false)
  }

  /// Rollback; `start` forces a service start even if it was not running.
  pub(crate) fn rollback_deployment(&self, name: &str, start: bool) -> Result<Slot, Error> {
    let ctx = self.ctx;
    let layout = ctx.layout(name);
    let current = layout.require_current()?;
    let previous = current.other();
    let previous_dir = layout.slot_dir(previous);
    let no_previous = || Error::NoPreviousDeployment(name.to_string());

    if !previous_dir.is_dir() {
      return Err(no_previous());
    }
    let mut previous_info = InfoRecord::load(&previous_dir).map_err(|_| no_previous())?;
    let previous_units = layout.slot_units(previous);
    if previous_info.has_container_service && !previous_units.unit.exists() {
      return Err(no_previous());
    }
    let info = layout.load_info(current)?;

    info!(name = %name, from = %current, to = %previous, "rolling back");
    let mut guard = RollbackGuard::new(ctx, &layout, current, &info);
    let was_active = info.has_container_service && ctx.services.is_active(name);
    if was_active {
      ctx.services.stop(name)?;
      guard.stopped = true;
    }

    let host_units = ctx.host_units(name);
    if host_units.tmpfiles.exists()
      && let Err(e) = ctx.services.tmpfiles_remove(&host_units.tmpfiles)
    {
      warn!(name = %name, error = %e, "failed to remove tmpfiles");
    }
    guard.units_swapped = true;
    host_units.remove()?;
    host_units.install_from(&previous_units)?;

    let baseline = match info.rpm_installed {
      Some(_) => Checksums::new(),
      None => info.installed_files_checksum.clone(),
    };
    guard.files_removed = true;
    let restored = if previous_info.rpm_installed.is_some() {
      hostfiles::remove_installed(&baseline, &ctx.config.sysroot)?;
      Checksums::new()
    } else {
      let values = ValueMap::from(previous_info.values.clone());
      let target = ReconcileTarget {
        prefix: &ctx.config.sysroot,
        rename: &previous_info.rename_installed_files,
        templates: &previous_info.installed_files_template,
        values: &values,
        use_links: previous_info.use_links,
      };
      let exports = layout.rootfs(previous).join(EXPORTS_DIR);
      hostfiles::reconcile(&baseline, Some(&exports), &target)?
    };
    guard.restored = restored.clone();
    if restored != previous_info.installed_files_checksum {
      previous_info.installed_files_checksum = restored;
      previous_info.save(&previous_dir)?;
    }

    rootfs::sync_dir(&previous_dir)?;
    layout.activate(previous)?;
    guard.armed = false;

    if info.rpm_installed.is_some() && previous_info.rpm_installed.is_none() {
      ctx.packager.uninstall(&package_name(name))?;
    }
    if let Some(package) = &previous_info.rpm_installed {
      ctx.packager.install(&previous_dir.join(package))?;
    }

    ctx.services.daemon_reload()?;
    if host_units.tmpfiles.exists() {
      ctx.services.tmpfiles_create(&host_units.tmpfiles)?;
    }
    if previous_info.has_container_service && (was_active || start) {
      ctx.services.start(name)?;
    }

    info!(name = %name, slot = %previous, "rolled back");
    Ok(previous)
  }
}
