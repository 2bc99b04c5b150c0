//! The deployment engine.
//!
//! A deployment is a named checkout of an image under the checkout root:
//!
//! ```text
//! <checkout_root>/<name>     -> <name>.0 | <name>.1
//! <checkout_root>/<name>.N/
//! ├── rootfs/                # image layers (or a link to a remote rootfs)
//! ├── config.json            # OCI runtime configuration
//! ├── <name>.service         # unit copy
//! ├── tmpfiles-<name>.conf   # tmpfiles copy
//! └── info                   # InfoRecord, written last
//! ```
//!
//! Install uses slot 0; every upgrade re-stages the other slot and swaps the
//! symlink, so the previous slot is the rollback target. Operations run
//! against a [`Context`] built once per invocation.

mod checkout;
pub mod layout;
pub mod prune;
pub mod query;
pub mod state;

mod install;
mod rollback;
mod uninstall;
mod upgrade;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::info::SystemPackage;
use crate::package::{Packager, RpmPackager};
use crate::platform::{HostIdentity, HostProbe, RuntimeFeatures, SystemProbe};
use crate::service::{ServiceManager, Systemd};
use crate::store::{ContentStore, FsRepo};
use crate::unit::HostUnits;
use crate::values::ValueMap;

pub use layout::{Layout, Slot};
pub use prune::PruneStats;
pub use query::DeploymentInfo;
pub use state::{ActivationEvent, ActivationMode, ActivationState, CheckoutPhase};

/// Everything one invocation needs: configuration, the content store and
/// the host integrations.
pub struct Context {
  pub config: Config,
  pub store: Box<dyn ContentStore>,
  pub services: Arc<dyn ServiceManager>,
  pub packager: Arc<dyn Packager>,
  pub host: HostIdentity,
  pub features: RuntimeFeatures,
}

impl Context {
  pub fn new(
    config: Config,
    store: Box<dyn ContentStore>,
    services: Arc<dyn ServiceManager>,
    packager: Arc<dyn Packager>,
    probe: &dyn HostProbe,
  ) -> Self {
    let host = probe.identity();
    let features = probe.runtime_features(config.user);
    debug!(
      uid = host.uid,
      user = config.user,
      runtime = %features.runtime,
      available = features.available,
      "host probed"
    );
    Self {
      config,
      store,
      services,
      packager,
      host,
      features,
    }
  }

  /// Context backed by the running system.
  pub fn system(config: Config) -> Result<Self, Error> {
    let store = FsRepo::open(&config.store_dir)?;
    let user = config.user;
    Ok(Self::new(
      config,
      Box::new(store),
      Arc::new(Systemd::new(user)),
      Arc::new(RpmPackager::default()),
      &SystemProbe,
    ))
  }

  pub fn layout(&self, name: &str) -> Layout {
    Layout::new(&self.config.checkout_dir, name)
  }

  pub fn host_units(&self, name: &str) -> HostUnits {
    HostUnits::new(&self.config.unit_dir(), &self.config.tmpfiles_dir(), name)
  }
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
  /// `--set` values.
  pub values: BTreeMap<String, String>,
  pub system_package: SystemPackage,
  /// Directory holding an already unpacked rootfs to use instead of a checkout.
  pub remote: Option<PathBuf>,
  /// Start the service and undo the install if it fails to start.
  pub controlled: bool,
  /// Where `system_package = build` puts the package; the working directory
  /// by default.
  pub package_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
  Installed { slot: Slot, values: ValueMap, started: bool },
  PackageBuilt(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
  pub values: BTreeMap<String, String>,
  /// Switch the deployment to another image.
  pub rebase: Option<String>,
  pub mode: ActivationMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
  UpToDate,
  Upgraded { slot: Slot, image_id: String },
}

/// Deployment operations over one [`Context`].
pub struct Engine<'a> {
  ctx: &'a Context,
}

impl<'a> Engine<'a> {
  pub fn new(ctx: &'a Context) -> Self {
    Self { ctx }
  }

  pub fn context(&self) -> &Context {
    self.ctx
  }

  /// Start `name`, driving the activation state machine. On failure in
  /// controlled mode `recover` runs; the start failure is returned either way.
  fn start_service(
    &self,
    name: &str,
    mode: ActivationMode,
    recover: impl FnOnce() -> Result<(), Error>,
  ) -> Result<(), Error> {
    let advance = |state: ActivationState, event: ActivationEvent| {
      let next = state.next(mode, event).unwrap_or(state);
      debug!(name = %name, from = %state, to = %next, "activation transition");
      next
    };

    let state = ActivationState::Activating;
    let source = match self.ctx.services.start(name) {
      Ok(()) => {
        advance(state, ActivationEvent::Started);
        info!(name = %name, "service started");
        return Ok(());
      }
      Err(e) => e,
    };

    let mut state = advance(state, ActivationEvent::StartFailed);
    warn!(name = %name, error = %source, "service failed to start");
    if !state.is_terminal(mode) {
      state = advance(state, ActivationEvent::RollbackStarted);
      state = match recover() {
        Ok(()) => {
          info!(name = %name, "rolled back after failed start");
          advance(state, ActivationEvent::RollbackSucceeded)
        }
        Err(e) => {
          warn!(name = %name, error = %e, "rollback after failed start failed");
          advance(state, ActivationEvent::RollbackFailed)
        }
      };
    }

    Err(Error::ActivationFailed {
      name: name.to_string(),
      state,
      source,
    })
  }
}

/// Container names become file names and unit names.
pub fn validate_name(name: &str) -> Result<(), Error> {
  let valid = !name.is_empty()
    && !name.starts_with('.')
    && !name.starts_with('-')
    && Slot::from_dir_name(name).is_none()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
  if valid {
    Ok(())
  } else {
    Err(Error::InvalidName(name.to_string()))
  }
}
