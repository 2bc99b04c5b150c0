use std::path::PathBuf;

use tracing::{info, warn};

use super::checkout::{self, CheckoutPlan, Previous};
use super::{ActivationMode, Engine, UpgradeOptions, UpgradeOutcome};
use crate::error::Error;
use crate::hostfiles::Checksums;
use crate::info::SystemPackage;
use crate::util::fs::remove_any;

impl Engine<'_> {
  /// Re-stage `name` from its image (or `rebase`) in the alternate slot and
  /// switch to it.
  pub fn upgrade(&self, name: &str, options: UpgradeOptions) -> Result<UpgradeOutcome, Error> {
    let ctx = self.ctx;
    let layout = ctx.layout(name);
    let current = layout.require_current()?;
    let info = layout.load_info(current)?;

    let image = options.rebase.clone().unwrap_or_else(|| info.image.clone());
    let remote = info.remote.as_deref().map(PathBuf::from);
    let (revision, exports) = checkout::prepare(ctx, &image, remote.as_deref())?;

    let overrides_changed = options.values.iter().any(|(k, v)| info.values.get(k) != Some(v));
    if revision.image_id == info.revision && !overrides_changed {
      info!(name = %name, image_id = %revision.image_id, "already up to date");
      return Ok(UpgradeOutcome::UpToDate);
    }

    let mut overrides = crate::values::ValueMap::from(info.values.clone()).without_forced();
    overrides.extend(options.values.clone());
    checkout::preflight(&exports, &image, &overrides)?;

    let next = current.other();
    let next_dir = layout.slot_dir(next);
    remove_any(&next_dir).map_err(Error::io(&next_dir))?;

    let was_active = info.has_container_service && ctx.services.is_active(name);
    if was_active {
      ctx.services.stop(name)?;
    }
    let host_units = ctx.host_units(name);
    if host_units.tmpfiles.exists()
      && let Err(e) = ctx.services.tmpfiles_remove(&host_units.tmpfiles)
    {
      warn!(name = %name, error = %e, "failed to remove previous tmpfiles");
    }

    let (package, baseline) = match info.rpm_installed {
      Some(_) => (SystemPackage::Yes, Checksums::new()),
      None => (SystemPackage::No, info.installed_files_checksum.clone()),
    };
    let previous = Previous {
      slot: current,
      info,
      was_active,
    };

    info!(name = %name, image = %image, from = %current, to = %next, "upgrading");
    let result = checkout::checkout(
      ctx,
      CheckoutPlan {
        layout: &layout,
        slot: next,
        revision: &revision,
        exports: &exports,
        overrides: &overrides,
        baseline: &baseline,
        previous: Some(&previous),
        package,
        remote: remote.as_deref(),
      },
    )?;

    let has_service = result.info.has_container_service;
    if has_service && (was_active || options.mode == ActivationMode::Controlled) {
      self.start_service(name, options.mode, || self.rollback_deployment(name, true).map(|_| ()))?;
    }

    Ok(UpgradeOutcome::Upgraded {
      slot: next,
      image_id: revision.image_id,
    })
  }
}
