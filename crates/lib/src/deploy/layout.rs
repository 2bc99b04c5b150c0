//! Deployment directories: `<name>` links to `<name>.0` or `<name>.1`.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Error;
use crate::info::InfoRecord;
use crate::unit::SlotUnits;
use crate::util::fs::{lexists, replace_symlink};

pub const ROOTFS_DIR: &str = "rootfs";

/// One of the two checkout slots of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
  Zero,
  One,
}

impl Slot {
  pub fn index(self) -> u8 {
    match self {
      Slot::Zero => 0,
      Slot::One => 1,
    }
  }

  pub fn other(self) -> Self {
    match self {
      Slot::Zero => Slot::One,
      Slot::One => Slot::Zero,
    }
  }

  /// The slot a directory name like `etcd.1` refers to.
  pub fn from_dir_name(name: &str) -> Option<Self> {
    if name.ends_with(".0") {
      Some(Slot::Zero)
    } else if name.ends_with(".1") {
      Some(Slot::One)
    } else {
      None
    }
  }
}

impl fmt::Display for Slot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.index())
  }
}

/// Paths of one named deployment under the checkout root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
  root: PathBuf,
  name: String,
}

impl Layout {
  pub fn new(root: &Path, name: &str) -> Self {
    Self {
      root: root.to_path_buf(),
      name: name.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// The stable `<name>` symlink.
  pub fn link(&self) -> PathBuf {
    self.root.join(&self.name)
  }

  pub fn slot_dir(&self, slot: Slot) -> PathBuf {
    self.root.join(format!("{}.{}", self.name, slot))
  }

  pub fn rootfs(&self, slot: Slot) -> PathBuf {
    self.slot_dir(slot).join(ROOTFS_DIR)
  }

  pub fn slot_units(&self, slot: Slot) -> SlotUnits {
    SlotUnits::new(&self.slot_dir(slot), &self.name)
  }

  pub fn is_installed(&self) -> bool {
    lexists(&self.link())
  }

  /// The slot the symlink points at; `None` when not installed.
  pub fn current_slot(&self) -> Result<Option<Slot>, Error> {
    let link = self.link();
    if !lexists(&link) {
      return Ok(None);
    }
    let target = fs::read_link(&link).map_err(Error::io(&link))?;
    let slot = target
      .file_name()
      .and_then(|n| n.to_str())
      .and_then(Slot::from_dir_name)
      .ok_or_else(|| Error::CorruptState {
        name: self.name.clone(),
        source: crate::info::InfoError::NotFound(target.clone()),
      })?;
    Ok(Some(slot))
  }

  /// The current slot, or [`Error::NotInstalled`].
  pub fn require_current(&self) -> Result<Slot, Error> {
    self.current_slot()?.ok_or_else(|| Error::NotInstalled(self.name.clone()))
  }

  /// Read a slot's info record; a missing or unreadable record is corrupt
  /// state.
  pub fn load_info(&self, slot: Slot) -> Result<InfoRecord, Error> {
    InfoRecord::load(&self.slot_dir(slot)).map_err(|source| Error::CorruptState {
      name: self.name.clone(),
      source,
    })
  }

  /// Atomically point the symlink at `slot`.
  pub fn activate(&self, slot: Slot) -> Result<(), Error> {
    let link = self.link();
    replace_symlink(&self.slot_dir(slot), &link).map_err(Error::io(&link))?;
    debug!(name = %self.name, slot = %slot, "deployment symlink updated");
    Ok(())
  }

  pub fn remove_link(&self) -> Result<(), Error> {
    let link = self.link();
    match fs::remove_file(&link) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(Error::io(&link)(e)),
    }
  }
}
