use tracing::{debug, info, warn};

use super::layout::Slot;
use super::{Engine, validate_name};
use crate::error::Error;
use crate::hostfiles;
use crate::package::package_name;
use crate::util::fs::remove_any;

impl Engine<'_> {
  /// Remove deployment `name`. Returns `false` when nothing was installed.
  ///
  /// Host files are removed only if unmodified. Slot directories that
  /// cannot be removed are left for [`prune`](Engine::prune).
  pub fn uninstall(&self, name: &str) -> Result<bool, Error> {
    let ctx = self.ctx;
    validate_name(name)?;
    let layout = ctx.layout(name);
    if !layout.is_installed() {
      debug!(name = %name, "not installed, nothing to do");
      return Ok(false);
    }

    let info = match layout.current_slot() {
      Ok(Some(slot)) => match layout.load_info(slot) {
        Ok(info) => Some(info),
        Err(e) => {
          warn!(name = %name, error = %e, "removing a deployment without readable info");
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!(name = %name, error = %e, "deployment link is broken");
        None
      }
    };

    info!(name = %name, "uninstalling");
    let has_service = info.as_ref().is_none_or(|i| i.has_container_service);
    if has_service {
      if ctx.services.is_active(name)
        && let Err(e) = ctx.services.stop(name)
      {
        warn!(name = %name, error = %e, "failed to stop service");
      }
      if let Err(e) = ctx.services.disable(name) {
        debug!(name = %name, error = %e, "failed to disable service");
      }
    }

    let host_units = ctx.host_units(name);
    if host_units.tmpfiles.exists()
      && let Err(e) = ctx.services.tmpfiles_remove(&host_units.tmpfiles)
    {
      warn!(name = %name, error = %e, "failed to remove tmpfiles");
    }
    host_units.remove()?;

    if let Some(info) = &info {
      let report = hostfiles::remove_installed(&info.installed_files_checksum, &ctx.config.sysroot)?;
      if !report.kept.is_empty() {
        info!(name = %name, kept = ?report.kept, "modified host files left in place");
      }
      if info.rpm_installed.is_some() {
        ctx.packager.uninstall(&package_name(name))?;
      }
    }

    layout.remove_link()?;
    for slot in [Slot::Zero, Slot::One] {
      let dir = layout.slot_dir(slot);
      if let Err(e) = remove_any(&dir) {
        warn!(path = %dir.display(), error = %e, "failed to remove checkout, prune will retry");
      }
    }

    ctx.services.daemon_reload()?;
    info!(name = %name, "uninstalled");
    Ok(true)
  }
}
