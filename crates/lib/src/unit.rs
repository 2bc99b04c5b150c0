//! Service unit, tmpfiles and OCI `config.json` generation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::exports::ImageExports;
use crate::hostfiles::host_path;
use crate::platform::RuntimeFeatures;
use crate::template::{self, TemplateError};
use crate::util::process::{self, CommandError};
use crate::values::ValueMap;

pub const CONFIG_FILENAME: &str = "config.json";

pub const DEFAULT_UNIT_TEMPLATE: &str = "\
[Unit]
Description=$NAME

[Service]
ExecStart=$EXEC_START
ExecStop=$EXEC_STOP
Restart=on-crash
WorkingDirectory=$DESTDIR

[Install]
WantedBy=multi-user.target
";

#[derive(Debug, Error)]
pub enum UnitError {
  #[error("invalid JSON in {path}: {source}")]
  InvalidJson {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid configuration file {path}: {reason}")]
  InvalidConfig { path: PathBuf, reason: &'static str },

  #[error("failed to write {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to generate a default configuration: {0}")]
  RuntimeSpec(#[source] CommandError),

  #[error(transparent)]
  Template(#[from] TemplateError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> UnitError + '_ {
  move |source| UnitError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// File name of the unit inside a slot and on the host.
pub fn unit_filename(name: &str) -> String {
  format!("{}.service", name)
}

/// File name of the tmpfiles declaration inside a slot.
pub fn slot_tmpfiles_filename(name: &str) -> String {
  format!("tmpfiles-{}.conf", name)
}

/// File name of the tmpfiles declaration on the host.
pub fn host_tmpfiles_filename(name: &str) -> String {
  format!("{}.conf", name)
}

fn read_config(path: &Path) -> Result<Value, UnitError> {
  let text = fs::read_to_string(path).map_err(io_err(path))?;
  serde_json::from_str(&text).map_err(|source| UnitError::InvalidJson {
    path: path.to_path_buf(),
    source,
  })
}

fn write_config_value(path: &Path, config: &Value) -> Result<(), UnitError> {
  let text = serde_json::to_string_pretty(config).map_err(|source| UnitError::InvalidJson {
    path: path.to_path_buf(),
    source,
  })?;
  fs::write(path, text).map_err(io_err(path))
}

fn set_field(config: &mut Value, section: &str, key: &str, value: Value) {
  if let Value::Object(map) = config {
    let entry = map.entry(section).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }
    if let Value::Object(inner) = entry {
      inner.insert(key.to_string(), value);
    }
  }
}

/// Write `<dest>/config.json`: copied from exports, rendered from
/// `config.json.template`, or generated with the runtime. A remote rootfs
/// replaces `root.path`.
pub fn write_config(
  dest: &Path,
  exports: &ImageExports,
  values: &ValueMap,
  features: &RuntimeFeatures,
  remote_rootfs: Option<&Path>,
) -> Result<PathBuf, UnitError> {
  let path = dest.join(CONFIG_FILENAME);

  if let Some(config) = &exports.config_json {
    debug!("using config.json from the image");
    fs::write(&path, config).map_err(io_err(&path))?;
  } else if let Some(config_template) = &exports.config_template {
    debug!("rendering config.json.template");
    let rendered = template::substitute("config.json.template", config_template, values)?;
    fs::write(&path, rendered).map_err(io_err(&path))?;
  } else {
    generate_default_config(dest, features)?;
  }

  if let Some(remote) = remote_rootfs {
    let mut config = read_config(&path)?;
    if !config.is_object() {
      return Err(UnitError::InvalidConfig {
        path,
        reason: "the configuration must be a JSON object",
      });
    }
    set_field(&mut config, "root", "path", Value::String(remote.display().to_string()));
    write_config_value(&path, &config)?;
  }

  Ok(path)
}

/// `runc spec` patched for a read-only `rootfs` running `run.sh`; `{}` when
/// no runtime is installed.
pub fn generate_default_config(dest: &Path, features: &RuntimeFeatures) -> Result<(), UnitError> {
  let path = dest.join(CONFIG_FILENAME);
  if !features.available {
    warn!(runtime = %features.runtime, "runtime not available, writing an empty configuration");
    return fs::write(&path, "{}").map_err(io_err(&path));
  }

  let runtime = features.path.display().to_string();
  if let Err(e) = fs::remove_file(&path)
    && e.kind() != io::ErrorKind::NotFound
  {
    return Err(io_err(&path)(e));
  }
  process::run(&runtime, &["spec"], Some(dest)).map_err(UnitError::RuntimeSpec)?;

  let mut config = read_config(&path)?;
  if !config.is_object() {
    return Err(UnitError::InvalidConfig {
      path,
      reason: "the configuration must be a JSON object",
    });
  }
  set_field(&mut config, "root", "readonly", Value::Bool(true));
  set_field(&mut config, "root", "path", Value::String("rootfs".to_string()));
  set_field(&mut config, "process", "terminal", Value::Bool(false));
  set_field(&mut config, "process", "args", serde_json::json!(["run.sh"]));

  write_config_value(&path, &config)
}

/// Validate `config.json` and return the sources of its bind mounts.
///
/// An empty configuration is accepted as is. Otherwise the root must be
/// read-only and, unless the rootfs is remote, located at `rootfs`.
pub fn check_config(path: &Path, remote: bool) -> Result<Vec<String>, UnitError> {
  let config = read_config(path)?;
  let Some(object) = config.as_object() else {
    return Err(UnitError::InvalidConfig {
      path: path.to_path_buf(),
      reason: "the configuration must be a JSON object",
    });
  };
  if object.is_empty() {
    return Ok(Vec::new());
  }

  let invalid = |reason| UnitError::InvalidConfig {
    path: path.to_path_buf(),
    reason,
  };
  let root = object.get("root").ok_or_else(|| invalid("the root section is missing"))?;
  if root.get("readonly").and_then(Value::as_bool) != Some(true) {
    return Err(invalid("only readonly images are supported"));
  }
  if !remote && root.get("path").and_then(Value::as_str) != Some("rootfs") {
    return Err(invalid("root.path must be 'rootfs'"));
  }

  let sources = object
    .get("mounts")
    .and_then(Value::as_array)
    .map(|mounts| {
      mounts
        .iter()
        .filter(|m| m.get("type").and_then(Value::as_str).is_some_and(|t| t.contains("bind")))
        .filter_map(|m| m.get("source").and_then(Value::as_str).map(str::to_string))
        .collect()
    })
    .unwrap_or_default();
  Ok(sources)
}

/// Bind-mount sources that do not exist under `sysroot`.
pub fn missing_bind_sources(sources: &[String], sysroot: &Path) -> Vec<String> {
  sources
    .iter()
    .filter(|s| !host_path(sysroot, s).exists())
    .cloned()
    .collect()
}

/// One `d` line per path, owned by `uid:gid`.
pub fn tmpfiles_lines(paths: &[String], uid: u32, gid: u32) -> String {
  paths
    .iter()
    .map(|p| format!("d {} 0700 {} {} - -\n", p, uid, gid))
    .collect()
}

/// Rendered unit and tmpfiles content for one deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedUnits {
  pub unit: Option<String>,
  pub tmpfiles: Option<String>,
}

/// Render the unit (when the image has a service) and the tmpfiles
/// declaration, falling back to directories for missing bind sources.
pub fn render(
  exports: &ImageExports,
  values: &ValueMap,
  missing_sources: &[String],
  uid: u32,
  gid: u32,
) -> Result<GeneratedUnits, UnitError> {
  let unit = if exports.has_container_service() {
    let text = exports.service_template.as_deref().unwrap_or(DEFAULT_UNIT_TEMPLATE);
    Some(template::substitute("service.template", text, values)?)
  } else {
    None
  };

  let tmpfiles = match &exports.tmpfiles_template {
    Some(text) => Some(template::substitute("tmpfiles.template", text, values)?),
    None if !missing_sources.is_empty() => Some(tmpfiles_lines(missing_sources, uid, gid)),
    None => None,
  }
  .filter(|t| !t.trim().is_empty());

  Ok(GeneratedUnits { unit, tmpfiles })
}

/// Paths of the unit and tmpfiles copies stored in a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotUnits {
  pub unit: PathBuf,
  pub tmpfiles: PathBuf,
}

impl SlotUnits {
  pub fn new(slot: &Path, name: &str) -> Self {
    Self {
      unit: slot.join(unit_filename(name)),
      tmpfiles: slot.join(slot_tmpfiles_filename(name)),
    }
  }

  pub fn write(&self, units: &GeneratedUnits) -> Result<(), UnitError> {
    if let Some(unit) = &units.unit {
      fs::write(&self.unit, unit).map_err(io_err(&self.unit))?;
    }
    if let Some(tmpfiles) = &units.tmpfiles {
      fs::write(&self.tmpfiles, tmpfiles).map_err(io_err(&self.tmpfiles))?;
    }
    Ok(())
  }
}

/// Paths of the unit and tmpfiles declaration on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUnits {
  pub unit: PathBuf,
  pub tmpfiles: PathBuf,
}

impl HostUnits {
  pub fn new(unit_dir: &Path, tmpfiles_dir: &Path, name: &str) -> Self {
    Self {
      unit: unit_dir.join(unit_filename(name)),
      tmpfiles: tmpfiles_dir.join(host_tmpfiles_filename(name)),
    }
  }

  pub fn any_exists(&self) -> bool {
    self.unit.exists() || self.tmpfiles.exists()
  }

  /// Copy the slot's unit and tmpfiles onto the host. Returns the host files
  /// written.
  pub fn install_from(&self, slot: &SlotUnits) -> Result<Vec<PathBuf>, UnitError> {
    let mut written = Vec::new();
    for (src, dest) in [(&slot.unit, &self.unit), (&slot.tmpfiles, &self.tmpfiles)] {
      if !src.exists() {
        continue;
      }
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
      }
      fs::copy(src, dest).map_err(io_err(dest))?;
      written.push(dest.clone());
    }
    info!(files = written.len(), "service files installed");
    Ok(written)
  }

  /// Remove the unit and tmpfiles declaration; absent files are fine.
  pub fn remove(&self) -> Result<(), UnitError> {
    for path in [&self.unit, &self.tmpfiles] {
      match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed service file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path)(e)),
      }
    }
    Ok(())
  }
}
