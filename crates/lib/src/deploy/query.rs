//! Read-only views: deployments, template variables, extraction.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::layout::Slot;
use super::{Context, Engine};
use crate::backend::{BackendKind, ContainerInfo};
use crate::error::Error;
use crate::exports::ImageExports;
use crate::info::InfoRecord;
use crate::rootfs;
use crate::service::ServiceStatus;
use crate::store::Revision;
use crate::unit::CONFIG_FILENAME;

/// One deployment as shown by `hostctr info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentInfo {
  pub name: String,
  pub slot: u8,
  pub path: PathBuf,
  pub status: ServiceStatus,
  /// Whether the other slot holds a deployment to roll back to.
  pub has_previous: bool,
  pub info: InfoRecord,
}

fn command_of(slot_dir: &Path) -> String {
  let path = slot_dir.join(CONFIG_FILENAME);
  fs::read_to_string(&path)
    .ok()
    .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
    .and_then(|config| {
      config["process"]["args"].as_array().map(|args| {
        args
          .iter()
          .filter_map(|a| a.as_str())
          .collect::<Vec<_>>()
          .join(" ")
      })
    })
    .unwrap_or_default()
}

/// Every deployment under the checkout root, sorted by name.
pub fn containers(ctx: &Context) -> Result<Vec<ContainerInfo>, Error> {
  let root = &ctx.config.checkout_dir;
  if !root.is_dir() {
    return Ok(Vec::new());
  }

  let mut names: Vec<String> = fs::read_dir(root)
    .map_err(Error::io(root))?
    .flatten()
    .filter(|e| e.path().is_symlink())
    .filter_map(|e| e.file_name().to_str().map(str::to_string))
    .filter(|n| !n.starts_with('.') && Slot::from_dir_name(n).is_none())
    .collect();
  names.sort();

  let mut containers = Vec::new();
  for name in names {
    let layout = ctx.layout(&name);
    let Some(slot) = layout.current_slot()? else {
      continue;
    };
    let info = match layout.load_info(slot) {
      Ok(info) => info,
      Err(e) => {
        debug!(name = %name, error = %e, "skipping deployment without info");
        continue;
      }
    };
    let status = ServiceStatus::query(ctx.services.as_ref(), &name, info.has_container_service);
    containers.push(ContainerInfo {
      command: command_of(&layout.slot_dir(slot)),
      id: name,
      image: info.image,
      image_id: info.revision,
      created: info.created,
      runtime: info.runtime.to_string(),
      status: status.as_str().to_string(),
      backend: BackendKind::ContentStore,
    });
  }
  Ok(containers)
}

impl Engine<'_> {
  pub fn containers(&self) -> Result<Vec<ContainerInfo>, Error> {
    containers(self.ctx)
  }

  /// Details of deployment `name`.
  pub fn info(&self, name: &str) -> Result<DeploymentInfo, Error> {
    let layout = self.ctx.layout(name);
    let slot = layout.require_current()?;
    let info = layout.load_info(slot)?;
    let status = ServiceStatus::query(self.ctx.services.as_ref(), name, info.has_container_service);
    let previous = layout.slot_dir(slot.other());
    Ok(DeploymentInfo {
      name: name.to_string(),
      slot: slot.index(),
      path: layout.slot_dir(slot),
      status,
      has_previous: InfoRecord::load(&previous).is_ok(),
      info,
    })
  }

  /// Template variables of `image`: those with a default and those that
  /// must be set.
  pub fn template_variables(&self, image: &str) -> Result<(BTreeMap<String, String>, BTreeSet<String>), Error> {
    let store = self.ctx.store.as_ref();
    let revision = Revision::resolve(store, image)?;
    let layers = revision.layer_commits(store)?;
    let exports = ImageExports::from_store(store, image, &layers)?;
    Ok(exports.template_variables()?)
  }

  /// Check out `image`'s layers into `destination` without configuring
  /// anything.
  pub fn extract(&self, image: &str, destination: &Path) -> Result<Vec<String>, Error> {
    let store = self.ctx.store.as_ref();
    let revision = Revision::resolve(store, image)?;
    let layers = rootfs::materialize(store, &revision, destination)?;
    info!(image = %image, destination = %destination.display(), "image extracted");
    Ok(layers)
  }
}
