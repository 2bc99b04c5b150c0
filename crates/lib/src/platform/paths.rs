use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, DEFAULT_CONFIG_FILE};

/// Returns the user's home directory
pub fn home_dir() -> PathBuf {
  let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
  PathBuf::from(home)
}

/// Returns the configuration file, honoring `HOSTCTR_CONFIG`
pub fn config_file() -> PathBuf {
  if let Ok(path) = std::env::var("HOSTCTR_CONFIG") {
    return PathBuf::from(path);
  }
  PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Returns the runtime directory of an unprivileged user
pub fn runtime_dir(uid: u32) -> PathBuf {
  std::env::var("XDG_RUNTIME_DIR")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from(format!("/run/user/{}", uid)))
}

/// Default root for deployment checkouts
pub fn default_checkout_dir(user: bool) -> PathBuf {
  if user {
    return home_dir().join(".containers").join(APP_NAME);
  }
  PathBuf::from("/var/lib/containers").join(APP_NAME)
}

/// Default content store location
pub fn default_store_dir(user: bool) -> PathBuf {
  if user {
    return home_dir().join(".containers").join("repo");
  }
  PathBuf::from("/var/lib").join(APP_NAME).join("repo")
}

/// Directory receiving generated service units
pub fn unit_dir(sysroot: &Path, user: bool) -> PathBuf {
  if user {
    return home_dir().join(".config").join("systemd").join("user");
  }
  sysroot.join("etc").join("systemd").join("system")
}

/// Directory receiving generated tmpfiles declarations
pub fn tmpfiles_dir(sysroot: &Path, user: bool) -> PathBuf {
  if user {
    return home_dir().join(".containers").join("tmpfiles");
  }
  sysroot.join("etc").join("tmpfiles.d")
}
