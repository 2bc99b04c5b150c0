//! Removing what no deployment or tagged image references.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::Engine;
use super::layout::Slot;
use crate::error::Error;
use crate::store::StorePruneStats;
use crate::util::fs::dir_size;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PruneStats {
  pub checkouts_scanned: usize,
  pub checkouts_deleted: usize,
  pub checkouts_bytes_freed: u64,
  pub deleted_checkouts: Vec<PathBuf>,
  pub store: StorePruneStats,
}

impl PruneStats {
  pub fn total_bytes_freed(&self) -> u64 {
    self.checkouts_bytes_freed + self.store.bytes_freed
  }
}

impl Engine<'_> {
  /// Delete slot directories no deployment symlink points at, then prune
  /// the content store.
  pub fn prune(&self) -> Result<PruneStats, Error> {
    let ctx = self.ctx;
    let root = &ctx.config.checkout_dir;
    let mut stats = PruneStats::default();

    if root.is_dir() {
      let entries: Vec<_> = fs::read_dir(root)
        .map_err(Error::io(root))?
        .flatten()
        .map(|e| e.path())
        .collect();

      let live: HashSet<PathBuf> = entries
        .iter()
        .filter(|p| p.is_symlink())
        .filter_map(|p| fs::read_link(p).ok().map(|t| root.join(t)))
        .collect();
      debug!(count = live.len(), "collected live checkouts");

      for path in entries {
        let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
          continue;
        };
        if path.is_symlink() || !path.is_dir() || Slot::from_dir_name(dir_name).is_none() {
          continue;
        }
        stats.checkouts_scanned += 1;
        if live.contains(&path) {
          continue;
        }

        let size = dir_size(&path);
        debug!(path = %path.display(), "removing unreferenced checkout");
        match fs::remove_dir_all(&path) {
          Ok(()) => {
            stats.checkouts_deleted += 1;
            stats.checkouts_bytes_freed += size;
            stats.deleted_checkouts.push(path);
          }
          Err(e) => warn!(path = %path.display(), error = %e, "failed to delete checkout"),
        }
      }
    }

    stats.store = ctx.store.prune()?;

    info!(
      checkouts_deleted = stats.checkouts_deleted,
      refs_deleted = stats.store.refs_deleted,
      objects_deleted = stats.store.objects_deleted,
      bytes_freed = stats.total_bytes_freed(),
      "prune complete"
    );
    Ok(stats)
  }
}
