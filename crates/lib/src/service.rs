//! The host service manager.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::util::process::{self, CommandError};

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("{action} {unit} failed: {source}")]
  Command {
    action: &'static str,
    unit: String,
    #[source]
    source: CommandError,
  },
}

/// Operations the deployment engine needs from systemd. Implemented by
/// [`Systemd`]; faked in tests.
pub trait ServiceManager {
  fn daemon_reload(&self) -> Result<(), ServiceError>;
  fn enable(&self, name: &str) -> Result<(), ServiceError>;
  fn disable(&self, name: &str) -> Result<(), ServiceError>;
  fn start(&self, name: &str) -> Result<(), ServiceError>;
  fn stop(&self, name: &str) -> Result<(), ServiceError>;
  fn is_active(&self, name: &str) -> bool;
  fn is_failed(&self, name: &str) -> bool;
  /// `systemd-tmpfiles --create <conf>`.
  fn tmpfiles_create(&self, conf: &Path) -> Result<(), ServiceError>;
  /// `systemd-tmpfiles --remove <conf>`.
  fn tmpfiles_remove(&self, conf: &Path) -> Result<(), ServiceError>;
}

/// State of a deployment's unit as shown in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
  Running,
  Failed,
  Inactive,
  /// The deployment has no service.
  None,
}

impl ServiceStatus {
  pub fn query(services: &dyn ServiceManager, name: &str, has_service: bool) -> Self {
    if !has_service {
      ServiceStatus::None
    } else if services.is_active(name) {
      ServiceStatus::Running
    } else if services.is_failed(name) {
      ServiceStatus::Failed
    } else {
      ServiceStatus::Inactive
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ServiceStatus::Running => "running",
      ServiceStatus::Failed => "failed",
      ServiceStatus::Inactive => "inactive",
      ServiceStatus::None => "-",
    }
  }
}

/// `systemctl` and `systemd-tmpfiles`, with `--user` for per-user deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Systemd {
  pub user: bool,
}

impl Systemd {
  pub fn new(user: bool) -> Self {
    Self { user }
  }

  fn systemctl(&self, action: &'static str, unit: Option<&str>) -> Result<String, ServiceError> {
    let mut args = Vec::new();
    if self.user {
      args.push("--user");
    }
    args.push(action);
    let unit_name = unit.map(|u| format!("{}.service", u));
    if let Some(unit_name) = &unit_name {
      args.push(unit_name);
    }
    process::run("systemctl", &args, None).map_err(|source| ServiceError::Command {
      action,
      unit: unit.unwrap_or("systemd").to_string(),
      source,
    })
  }

  fn tmpfiles(&self, action: &'static str, conf: &Path) -> Result<(), ServiceError> {
    let mut args = Vec::new();
    if self.user {
      args.push("--user".to_string());
    }
    args.push(action.to_string());
    args.push(conf.display().to_string());
    process::run("systemd-tmpfiles", &args, None)
      .map(|_| ())
      .map_err(|source| ServiceError::Command {
        action: "systemd-tmpfiles",
        unit: conf.display().to_string(),
        source,
      })
  }
}

impl ServiceManager for Systemd {
  fn daemon_reload(&self) -> Result<(), ServiceError> {
    debug!(user = self.user, "reloading service manager");
    self.systemctl("daemon-reload", None).map(|_| ())
  }

  fn enable(&self, name: &str) -> Result<(), ServiceError> {
    self.systemctl("enable", Some(name)).map(|_| ())
  }

  fn disable(&self, name: &str) -> Result<(), ServiceError> {
    self.systemctl("disable", Some(name)).map(|_| ())
  }

  fn start(&self, name: &str) -> Result<(), ServiceError> {
    info!(service = %name, "starting service");
    self.systemctl("start", Some(name)).map(|_| ())
  }

  fn stop(&self, name: &str) -> Result<(), ServiceError> {
    info!(service = %name, "stopping service");
    self.systemctl("stop", Some(name)).map(|_| ())
  }

  fn is_active(&self, name: &str) -> bool {
    self.systemctl("is-active", Some(name)).is_ok()
  }

  fn is_failed(&self, name: &str) -> bool {
    self.systemctl("is-failed", Some(name)).is_ok()
  }

  fn tmpfiles_create(&self, conf: &Path) -> Result<(), ServiceError> {
    self.tmpfiles("--create", conf)
  }

  fn tmpfiles_remove(&self, conf: &Path) -> Result<(), ServiceError> {
    self.tmpfiles("--remove", conf)
  }
}
