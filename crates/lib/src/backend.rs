//! Uniform image/container view over the two storage backends.
//!
//! The content-store backend lists images from the local repository and
//! containers from deployment checkouts; the daemon backend asks the docker
//! CLI. Which one the CLI uses is `default_storage` in the configuration.

use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::deploy::{Context, query};
use crate::error::Error;
use crate::store::{ImageInfo, StoreError};
use crate::util::process::{self, CommandError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
  #[default]
  #[serde(alias = "ostree")]
  ContentStore,
  #[serde(alias = "docker")]
  Daemon,
}

impl BackendKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      BackendKind::ContentStore => "content-store",
      BackendKind::Daemon => "daemon",
    }
  }
}

impl std::fmt::Display for BackendKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for BackendKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "content-store" | "ostree" => Ok(BackendKind::ContentStore),
      "daemon" | "docker" => Ok(BackendKind::Daemon),
      other => Err(format!(
        "invalid storage `{}` (expected content-store or daemon)",
        other
      )),
    }
  }
}

#[derive(Debug, Error)]
pub enum BackendError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Command(#[from] CommandError),

  #[error("unexpected output from `{command}`: {source}")]
  Parse {
    command: String,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Deployment(Box<Error>),
}

impl From<Error> for BackendError {
  fn from(e: Error) -> Self {
    BackendError::Deployment(Box::new(e))
  }
}

/// Listing entry for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerInfo {
  pub id: String,
  pub image: String,
  pub image_id: String,
  /// Seconds since the epoch.
  pub created: u64,
  pub command: String,
  pub runtime: String,
  pub status: String,
  pub backend: BackendKind,
}

pub trait StorageBackend {
  fn kind(&self) -> BackendKind;
  fn images(&self, include_untagged: bool) -> Result<Vec<ImageInfo>, BackendError>;
  fn inspect_image(&self, image: &str) -> Result<ImageInfo, BackendError>;
  fn containers(&self) -> Result<Vec<ContainerInfo>, BackendError>;
  /// Delete an image; returns the refs or ids removed.
  fn delete_image(&self, image: &str) -> Result<Vec<String>, BackendError>;

  fn has_image(&self, image: &str) -> bool {
    self.inspect_image(image).is_ok()
  }
}

/// Images from the content store, containers from deployment checkouts.
pub struct ContentStoreBackend<'a> {
  ctx: &'a Context,
}

impl<'a> ContentStoreBackend<'a> {
  pub fn new(ctx: &'a Context) -> Self {
    Self { ctx }
  }
}

impl StorageBackend for ContentStoreBackend<'_> {
  fn kind(&self) -> BackendKind {
    BackendKind::ContentStore
  }

  fn images(&self, include_untagged: bool) -> Result<Vec<ImageInfo>, BackendError> {
    Ok(self.ctx.store.list_images(include_untagged)?)
  }

  fn inspect_image(&self, image: &str) -> Result<ImageInfo, BackendError> {
    Ok(self.ctx.store.inspect(image)?)
  }

  fn containers(&self) -> Result<Vec<ContainerInfo>, BackendError> {
    Ok(query::containers(self.ctx)?)
  }

  fn delete_image(&self, image: &str) -> Result<Vec<String>, BackendError> {
    Ok(self.ctx.store.delete_image(image)?)
  }
}

/// The docker CLI.
#[derive(Debug, Clone)]
pub struct DaemonBackend {
  program: String,
}

impl Default for DaemonBackend {
  fn default() -> Self {
    Self {
      program: "docker".to_string(),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerImageLine {
  #[serde(rename = "ID")]
  id: String,
  repository: String,
  tag: String,
  #[serde(default)]
  created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DockerContainerLine {
  #[serde(rename = "ID")]
  id: String,
  image: String,
  #[serde(default)]
  command: String,
  #[serde(default)]
  created_at: String,
  #[serde(default)]
  names: String,
  #[serde(default)]
  state: String,
}

/// Parse docker's `2024-01-02 03:04:05 +0000 UTC` timestamps.
fn parse_created(created_at: &str) -> u64 {
  let mut parts = created_at.split_whitespace();
  let (Some(date), Some(time)) = (parts.next(), parts.next()) else {
    return 0;
  };
  humantime::parse_rfc3339_weak(&format!("{}T{}", date, time))
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

fn parse_lines<T: for<'de> Deserialize<'de>>(command: &str, output: &str) -> Result<Vec<T>, BackendError> {
  output
    .lines()
    .filter(|l| !l.trim().is_empty())
    .map(|l| {
      serde_json::from_str(l).map_err(|source| BackendError::Parse {
        command: command.to_string(),
        source,
      })
    })
    .collect()
}

fn image_from_line(line: DockerImageLine) -> ImageInfo {
  let repo_tags = if line.repository == "<none>" {
    vec!["<none>".to_string()]
  } else {
    vec![format!("{}:{}", line.repository, line.tag)]
  };
  ImageInfo {
    id: line.id.clone(),
    image_id: line.id,
    version: line.tag,
    repo_tags,
    created: parse_created(&line.created_at),
    labels: Default::default(),
    commit: String::new(),
    branch: String::new(),
    virtual_size: None,
  }
}

fn container_from_line(line: DockerContainerLine) -> ContainerInfo {
  let id = line.names.split(',').next().filter(|n| !n.is_empty()).unwrap_or(&line.id).to_string();
  ContainerInfo {
    id,
    image: line.image,
    image_id: line.id,
    created: parse_created(&line.created_at),
    command: line.command.trim_matches('"').to_string(),
    runtime: "docker".to_string(),
    status: line.state,
    backend: BackendKind::Daemon,
  }
}

impl DaemonBackend {
  pub fn with_program(program: impl Into<String>) -> Self {
    Self { program: program.into() }
  }

  fn docker(&self, args: &[&str]) -> Result<String, BackendError> {
    debug!(program = %self.program, ?args, "querying container daemon");
    Ok(process::run(&self.program, args, None)?)
  }
}

impl StorageBackend for DaemonBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Daemon
  }

  fn images(&self, include_untagged: bool) -> Result<Vec<ImageInfo>, BackendError> {
    let mut args = vec!["images", "--format", "{{json .}}"];
    if include_untagged {
      args.push("--all");
    }
    let output = self.docker(&args)?;
    let images = parse_lines::<DockerImageLine>("docker images", &output)?
      .into_iter()
      .map(image_from_line)
      .filter(|i| include_untagged || i.is_tagged())
      .collect();
    Ok(images)
  }

  fn inspect_image(&self, image: &str) -> Result<ImageInfo, BackendError> {
    let output = self.docker(&["images", "--format", "{{json .}}", image])?;
    parse_lines::<DockerImageLine>("docker images", &output)?
      .into_iter()
      .next()
      .map(image_from_line)
      .ok_or_else(|| BackendError::Store(StoreError::NotFound(image.to_string())))
  }

  fn containers(&self) -> Result<Vec<ContainerInfo>, BackendError> {
    let output = self.docker(&["ps", "--all", "--no-trunc", "--format", "{{json .}}"])?;
    Ok(
      parse_lines::<DockerContainerLine>("docker ps", &output)?
        .into_iter()
        .map(container_from_line)
        .collect(),
    )
  }

  fn delete_image(&self, image: &str) -> Result<Vec<String>, BackendError> {
    self.docker(&["rmi", image])?;
    Ok(vec![image.to_string()])
  }
}
