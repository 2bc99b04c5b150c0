//! The configuration variables available to image templates.
//!
//! A checkout's [`ValueMap`] is layered, lowest priority first:
//!
//! 1. `defaultValues` from the image's `exports/manifest.json`
//! 2. values computed from the host ([`OVERRIDABLE_VARIABLES`])
//! 3. `--set KEY=VALUE` overrides
//!
//! [`FORCED_VARIABLES`] always take the computed value.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::platform::{HostIdentity, Runtime, RuntimeFeatures};
use crate::template::Resolver;

/// Variables whose value is always computed; user input is ignored.
pub const FORCED_VARIABLES: &[&str] = &[
  "DESTDIR",
  "NAME",
  "EXEC_START",
  "EXEC_STOP",
  "EXEC_STARTPRE",
  "EXEC_STOPPOST",
  "HOST_UID",
  "HOST_GID",
  "IMAGE_ID",
  "IMAGE_NAME",
];

/// Variables with a computed default that `--set` may replace.
pub const OVERRIDABLE_VARIABLES: &[&str] = &[
  "RUN_DIRECTORY",
  "STATE_DIRECTORY",
  "CONF_DIRECTORY",
  "UUID",
  "PIDFILE",
  "ALL_PROCESS_CAPABILITIES",
];

/// Every Linux capability, for `ALL_PROCESS_CAPABILITIES`.
pub const CAPABILITIES: &[&str] = &[
  "CAP_CHOWN",
  "CAP_DAC_OVERRIDE",
  "CAP_DAC_READ_SEARCH",
  "CAP_FOWNER",
  "CAP_FSETID",
  "CAP_KILL",
  "CAP_SETGID",
  "CAP_SETUID",
  "CAP_SETPCAP",
  "CAP_LINUX_IMMUTABLE",
  "CAP_NET_BIND_SERVICE",
  "CAP_NET_BROADCAST",
  "CAP_NET_ADMIN",
  "CAP_NET_RAW",
  "CAP_IPC_LOCK",
  "CAP_IPC_OWNER",
  "CAP_SYS_MODULE",
  "CAP_SYS_RAWIO",
  "CAP_SYS_CHROOT",
  "CAP_SYS_PTRACE",
  "CAP_SYS_PACCT",
  "CAP_SYS_ADMIN",
  "CAP_SYS_BOOT",
  "CAP_SYS_NICE",
  "CAP_SYS_RESOURCE",
  "CAP_SYS_TIME",
  "CAP_SYS_TTY_CONFIG",
  "CAP_MKNOD",
  "CAP_LEASE",
  "CAP_AUDIT_WRITE",
  "CAP_AUDIT_CONTROL",
  "CAP_SETFCAP",
  "CAP_MAC_OVERRIDE",
  "CAP_MAC_ADMIN",
  "CAP_SYSLOG",
  "CAP_WAKE_ALARM",
  "CAP_BLOCK_SUSPEND",
  "CAP_AUDIT_READ",
  "CAP_PERFMON",
  "CAP_BPF",
  "CAP_CHECKPOINT_RESTORE",
];

pub fn is_forced(name: &str) -> bool {
  FORCED_VARIABLES.contains(&name)
}

pub fn is_overridable(name: &str) -> bool {
  OVERRIDABLE_VARIABLES.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValuesError {
  #[error("invalid value '{0}', expected the form NAME=VALUE")]
  InvalidSet(String),
}

/// Resolved template variables for one checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap(BTreeMap<String, String>);

impl ValueMap {
  pub fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name).map(String::as_str)
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.insert(name.into(), value.into());
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
    self.0.iter()
  }

  pub fn as_map(&self) -> &BTreeMap<String, String> {
    &self.0
  }

  /// Everything except forced variables; the base layer for an upgrade.
  pub fn without_forced(&self) -> BTreeMap<String, String> {
    self
      .0
      .iter()
      .filter(|(k, _)| !is_forced(k))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}

impl From<BTreeMap<String, String>> for ValueMap {
  fn from(map: BTreeMap<String, String>) -> Self {
    Self(map)
  }
}

impl Resolver for ValueMap {
  fn resolve(&self, name: &str) -> Option<&str> {
    self.get(name)
  }
}

/// Parse repeated `--set KEY=VALUE` arguments (split at the first `=`).
pub fn parse_set_values<S: AsRef<str>>(args: &[S]) -> Result<BTreeMap<String, String>, ValuesError> {
  let mut values = BTreeMap::new();
  for arg in args {
    let arg = arg.as_ref();
    match arg.split_once('=') {
      Some((key, value)) if !key.is_empty() => {
        values.insert(key.to_string(), value.to_string());
      }
      _ => return Err(ValuesError::InvalidSet(arg.to_string())),
    }
  }
  Ok(values)
}

/// Service manager exec lines for the installed runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecLines {
  pub start: String,
  pub stop: String,
  pub start_pre: String,
  pub stop_post: String,
}

pub fn exec_lines(features: &RuntimeFeatures, name: &str, pidfile: &str) -> ExecLines {
  let runtime = features.path.display();

  if features.runtime == Runtime::BwrapOci {
    return ExecLines {
      start: format!("{} '{}'", runtime, name),
      stop: String::new(),
      start_pre: String::new(),
      stop_post: String::new(),
    };
  }

  if features.legacy {
    return ExecLines {
      start: format!("{} start '{}'", runtime, name),
      stop: format!("{} kill '{}'", runtime, name),
      start_pre: String::new(),
      stop_post: String::new(),
    };
  }

  if features.pid_file {
    return ExecLines {
      start: format!("{} --systemd-cgroup run -d --pid-file {} '{}'", runtime, pidfile, name),
      stop: format!("{} kill '{}'", runtime, name),
      start_pre: String::new(),
      stop_post: format!("{} delete '{}'", runtime, name),
    };
  }

  ExecLines {
    start: format!("{} run '{}'", runtime, name),
    stop: format!("{} kill '{}'", runtime, name),
    start_pre: String::new(),
    stop_post: String::new(),
  }
}

/// Inputs for computing a [`ValueMap`].
#[derive(Debug, Clone)]
pub struct ValueContext<'a> {
  pub name: &'a str,
  pub destdir: &'a Path,
  pub image_name: &'a str,
  pub image_id: &'a str,
  pub host: &'a HostIdentity,
  pub features: &'a RuntimeFeatures,
}

fn computed_overridable(ctx: &ValueContext) -> BTreeMap<String, String> {
  let (run, state, conf) = if ctx.host.user {
    (
      ctx.host.runtime_dir.display().to_string(),
      ctx.host.home.join(".data").display().to_string(),
      ctx.host.home.join(".config").display().to_string(),
    )
  } else {
    ("/run".to_string(), "/var/lib".to_string(), "/etc".to_string())
  };

  let capabilities = CAPABILITIES
    .iter()
    .map(|c| format!("\"{}\"", c))
    .collect::<Vec<_>>()
    .join(",");

  BTreeMap::from([
    ("RUN_DIRECTORY".to_string(), run),
    ("STATE_DIRECTORY".to_string(), state),
    ("CONF_DIRECTORY".to_string(), conf),
    ("UUID".to_string(), uuid::Uuid::new_v4().to_string()),
    ("ALL_PROCESS_CAPABILITIES".to_string(), capabilities),
  ])
}

/// Compute the value map for a checkout.
pub fn resolve(
  defaults: &BTreeMap<String, String>,
  overrides: &BTreeMap<String, String>,
  ctx: &ValueContext,
) -> ValueMap {
  let mut values = ValueMap::default();

  for (key, value) in defaults.iter().filter(|(k, _)| !is_forced(k)) {
    values.insert(key.clone(), value.clone());
  }
  for (key, value) in computed_overridable(ctx) {
    values.insert(key, value);
  }
  for (key, value) in overrides {
    if is_forced(key) {
      debug!(variable = %key, "ignoring override of a forced variable");
      continue;
    }
    values.insert(key.clone(), value.clone());
  }

  if !overrides.contains_key("PIDFILE") {
    let run = values.get("RUN_DIRECTORY").unwrap_or("/run").to_string();
    values.insert("PIDFILE", format!("{}/container-{}.pid", run, ctx.name));
  }

  let pidfile = values.get("PIDFILE").unwrap_or_default().to_string();
  let exec = exec_lines(ctx.features, ctx.name, &pidfile);
  values.insert("DESTDIR", ctx.destdir.display().to_string());
  values.insert("NAME", ctx.name);
  values.insert("EXEC_START", exec.start);
  values.insert("EXEC_STOP", exec.stop);
  values.insert("EXEC_STARTPRE", exec.start_pre);
  values.insert("EXEC_STOPPOST", exec.stop_post);
  values.insert("HOST_UID", ctx.host.uid.to_string());
  values.insert("HOST_GID", ctx.host.gid.to_string());
  values.insert("IMAGE_NAME", ctx.image_name);
  values.insert("IMAGE_ID", ctx.image_id);

  values
}

/// Variables referenced by templates that nothing will provide, sorted.
pub fn missing_variables(
  referenced: &BTreeSet<String>,
  defaults: &BTreeMap<String, String>,
  overrides: &BTreeMap<String, String>,
) -> Vec<String> {
  referenced
    .iter()
    .filter(|v| !is_forced(v) && !is_overridable(v))
    .filter(|v| !defaults.contains_key(*v) && !overrides.contains_key(*v))
    .cloned()
    .collect()
}
