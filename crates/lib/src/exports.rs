//! The `exports/` directory an image ships for its host integration.
//!
//! ```text
//! exports/
//! ├── manifest.json          # defaultValues, installedFilesTemplate, renameFiles, noContainerService
//! ├── service.template       # unit file template
//! ├── tmpfiles.template      # tmpfiles.d template
//! ├── config.json            # OCI config, copied verbatim
//! ├── config.json.template   # or rendered from a template
//! ├── rpm.spec(.template)    # spec for the system package
//! └── hostfs/                # files copied onto the host
//! ```
//!
//! Exports are read before anything is written, straight from the layers in
//! the store (or from a remote rootfs), so missing template values can be
//! reported up front.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::store::{ContentStore, StoreError, read_image_file};
use crate::template::{self, TemplateError};

pub const EXPORTS_DIR: &str = "exports";
pub const HOSTFS_DIR: &str = "hostfs";

#[derive(Debug, Error)]
pub enum ExportsError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid manifest.json file in image {image}: {source}")]
  InvalidManifest {
    image: String,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Template(#[from] TemplateError),
}

fn stringify_values<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw: BTreeMap<String, serde_json::Value> = BTreeMap::deserialize(deserializer)?;
  Ok(
    raw
      .into_iter()
      .map(|(k, v)| {
        let value = match v {
          serde_json::Value::String(s) => s,
          other => other.to_string(),
        };
        (k, value)
      })
      .collect(),
  )
}

/// `exports/manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportsManifest {
  #[serde(default, deserialize_with = "stringify_values")]
  pub default_values: BTreeMap<String, String>,

  /// Host paths (under `hostfs/`) rendered as templates rather than copied.
  #[serde(default)]
  pub installed_files_template: Vec<String>,

  /// Host path renames; values may contain template variables.
  #[serde(default)]
  pub rename_files: BTreeMap<String, String>,

  #[serde(default)]
  pub no_container_service: bool,
}

/// Everything the checkout needs from an image's exports.
#[derive(Debug, Clone, Default)]
pub struct ImageExports {
  pub manifest: ExportsManifest,
  pub service_template: Option<String>,
  pub tmpfiles_template: Option<String>,
  pub config_json: Option<String>,
  pub config_template: Option<String>,
  pub rpm_spec: Option<String>,
  pub rpm_spec_template: Option<String>,
  /// Contents of `installedFilesTemplate` entries, keyed by host path.
  pub host_templates: BTreeMap<String, String>,
  pub has_hostfs: bool,
}

fn to_string(path: &str, bytes: Vec<u8>) -> Result<String, ExportsError> {
  String::from_utf8(bytes).map_err(|e| ExportsError::Read {
    path: PathBuf::from(path),
    source: io::Error::new(io::ErrorKind::InvalidData, e),
  })
}

fn hostfs_path(host_path: &str) -> String {
  format!("{}/{}", HOSTFS_DIR, host_path.trim_start_matches('/'))
}

impl ImageExports {
  fn load(
    image: &str,
    read: impl Fn(&str) -> Result<Option<Vec<u8>>, ExportsError>,
    has_hostfs: bool,
  ) -> Result<Self, ExportsError> {
    let read_text = |rel: &str| -> Result<Option<String>, ExportsError> {
      read(rel)?.map(|bytes| to_string(rel, bytes)).transpose()
    };

    let manifest = match read_text("manifest.json")? {
      Some(text) => serde_json::from_str(&text).map_err(|source| ExportsError::InvalidManifest {
        image: image.to_string(),
        source,
      })?,
      None => ExportsManifest::default(),
    };

    let mut host_templates = BTreeMap::new();
    for path in &manifest.installed_files_template {
      if let Some(content) = read_text(&hostfs_path(path))? {
        host_templates.insert(path.clone(), content);
      }
    }

    Ok(Self {
      service_template: read_text("service.template")?,
      tmpfiles_template: read_text("tmpfiles.template")?,
      config_json: read_text("config.json")?,
      config_template: read_text("config.json.template")?,
      rpm_spec: read_text("rpm.spec")?,
      rpm_spec_template: read_text("rpm.spec.template")?,
      host_templates,
      has_hostfs,
      manifest,
    })
  }

  /// Read exports from image layers in the store (base layer first).
  pub fn from_store(store: &dyn ContentStore, image: &str, layers: &[String]) -> Result<Self, ExportsError> {
    let mut has_hostfs = false;
    let hostfs = Path::new(EXPORTS_DIR).join(HOSTFS_DIR);
    for commit in layers {
      if store.layer_has_path(commit, &hostfs)? {
        has_hostfs = true;
        break;
      }
    }

    Self::load(
      image,
      |rel| Ok(read_image_file(store, layers, &Path::new(EXPORTS_DIR).join(rel))?),
      has_hostfs,
    )
  }

  /// Read exports from a checked-out `exports/` directory.
  pub fn from_dir(image: &str, exports: &Path) -> Result<Self, ExportsError> {
    Self::load(
      image,
      |rel| {
        let path = exports.join(rel);
        match fs::read(&path) {
          Ok(bytes) => Ok(Some(bytes)),
          Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => Ok(None),
          Err(source) => Err(ExportsError::Read { path, source }),
        }
      },
      exports.join(HOSTFS_DIR).is_dir(),
    )
  }

  /// Whether `--system-package=auto` should build a package.
  pub fn wants_system_package(&self) -> bool {
    self.rpm_spec.is_some() || self.rpm_spec_template.is_some() || self.has_hostfs
  }

  pub fn has_container_service(&self) -> bool {
    !self.manifest.no_container_service
  }

  /// Every variable referenced by the image's templates and rename rules.
  pub fn referenced_variables(&self) -> Result<BTreeSet<String>, TemplateError> {
    let mut vars = BTreeSet::new();
    let sources = [
      ("service.template", self.service_template.as_deref()),
      ("tmpfiles.template", self.tmpfiles_template.as_deref()),
      ("config.json.template", self.config_template.as_deref()),
      ("rpm.spec.template", self.rpm_spec_template.as_deref()),
    ];
    for (name, text) in sources {
      if let Some(text) = text {
        vars.extend(template::variables(name, text)?);
      }
    }
    for (path, text) in &self.host_templates {
      vars.extend(template::variables(path, text)?);
    }
    for target in self.manifest.rename_files.values() {
      vars.extend(template::variables("manifest.json", target)?);
    }
    Ok(vars)
  }

  /// Variables referenced by templates, split into those with a default
  /// (manifest or host-computed) and those the user must set.
  pub fn template_variables(&self) -> Result<(BTreeMap<String, String>, BTreeSet<String>), TemplateError> {
    let mut with_default = self.manifest.default_values.clone();
    for var in crate::values::OVERRIDABLE_VARIABLES {
      with_default.insert(var.to_string(), "{SET_BY_OS}".to_string());
    }

    let to_set = self
      .referenced_variables()?
      .into_iter()
      .filter(|v| !crate::values::is_forced(v) && !with_default.contains_key(v))
      .collect();

    Ok((with_default, to_set))
  }
}
