mod containers;
mod extract;
mod image_delete;
mod images;
mod import;
mod info;
mod install;
mod prune;
mod rollback;
mod uninstall;
mod update;

use anyhow::{Context as _, Result};
use tracing::debug;

use hostctr_lib::backend::{BackendKind, ContentStoreBackend, DaemonBackend, StorageBackend};
use hostctr_lib::config::Config;
use hostctr_lib::deploy::Context;
use hostctr_lib::platform;

pub use containers::cmd_containers;
pub use extract::cmd_extract;
pub use image_delete::cmd_image_delete;
pub use images::cmd_images;
pub use import::cmd_import;
pub use info::cmd_info;
pub use install::{InstallArgs, cmd_install};
pub use prune::cmd_prune;
pub use rollback::cmd_rollback;
pub use uninstall::cmd_uninstall;
pub use update::cmd_update;

/// Configuration for the invoking user. Unprivileged callers get per-user
/// deployments.
fn load_config() -> Result<Config> {
  Config::load(!platform::is_elevated()).context("Failed to load configuration")
}

fn load_context() -> Result<Context> {
  let config = load_config()?;
  debug!(
    checkouts = %config.checkout_dir.display(),
    store = %config.store_dir.display(),
    sysroot = %config.sysroot.display(),
    user = config.user,
    "configuration loaded"
  );
  Context::system(config).context("Failed to open the content store")
}

/// The storage backend to list from: `--storage` if given, else the
/// configured default.
fn backend<'a>(ctx: &'a Context, storage: Option<BackendKind>) -> Box<dyn StorageBackend + 'a> {
  match storage.unwrap_or(ctx.config.backend) {
    BackendKind::ContentStore => Box::new(ContentStoreBackend::new(ctx)),
    BackendKind::Daemon => Box::new(DaemonBackend::default()),
  }
}
