//! Top-level error for deployment operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::deploy::state::ActivationState;
use crate::exports::ExportsError;
use crate::hostfiles::HostFileError;
use crate::info::InfoError;
use crate::package::PackageError;
use crate::rootfs::RootfsError;
use crate::service::ServiceError;
use crate::store::StoreError;
use crate::template::TemplateError;
use crate::unit::UnitError;
use crate::values::ValuesError;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Bad input; detected before any side effect.
  Validation,
  /// Image or layer not found, or ambiguous.
  Resolution,
  Filesystem,
  /// A host tool exited non-zero.
  ExternalTool,
  /// A deployment's info record is missing or unreadable.
  CorruptState,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0} already present")]
  AlreadyExists(String),

  #[error("container {0} is not installed")]
  NotInstalled(String),

  #[error("no previous deployment of {0} to roll back to")]
  NoPreviousDeployment(String),

  #[error("image {image} needs values for: {}", .variables.join(", "))]
  MissingValues { image: String, variables: Vec<String> },

  #[error("invalid container name `{0}`")]
  InvalidName(String),

  #[error("{0}")]
  InvalidArgument(String),

  #[error("container {name} failed to start (activation {state})")]
  ActivationFailed {
    name: String,
    state: ActivationState,
    #[source]
    source: ServiceError,
  },

  #[error("deployment {name} is corrupt: {source}")]
  CorruptState {
    name: String,
    #[source]
    source: InfoError,
  },

  #[error("failed to update {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Rootfs(#[from] RootfsError),

  #[error(transparent)]
  Exports(#[from] ExportsError),

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Values(#[from] ValuesError),

  #[error(transparent)]
  HostFile(#[from] HostFileError),

  #[error(transparent)]
  Unit(#[from] UnitError),

  #[error(transparent)]
  Info(#[from] InfoError),

  #[error(transparent)]
  Service(#[from] ServiceError),

  #[error(transparent)]
  Package(#[from] PackageError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Backend(#[from] BackendError),
}

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
    let path = path.into();
    move |source| Error::Io { path, source }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::AlreadyExists(_)
      | Error::NotInstalled(_)
      | Error::NoPreviousDeployment(_)
      | Error::MissingValues { .. }
      | Error::InvalidName(_)
      | Error::InvalidArgument(_)
      | Error::Template(_)
      | Error::Values(_)
      | Error::Config(_) => ErrorKind::Validation,
      Error::ActivationFailed { .. } | Error::Service(_) => ErrorKind::ExternalTool,
      Error::CorruptState { .. } => ErrorKind::CorruptState,
      Error::Io { .. } => ErrorKind::Filesystem,
      Error::Store(e) => store_kind(e),
      Error::Rootfs(e) => match e {
        RootfsError::Store(e) => store_kind(e),
        RootfsError::Prepare { .. } | RootfsError::Sync { .. } => ErrorKind::Filesystem,
      },
      Error::Exports(e) => match e {
        ExportsError::Store(e) => store_kind(e),
        ExportsError::Read { .. } => ErrorKind::Filesystem,
        ExportsError::InvalidManifest { .. } | ExportsError::Template(_) => ErrorKind::Validation,
      },
      Error::HostFile(e) => match e {
        HostFileError::Template(_) => ErrorKind::Validation,
        _ => ErrorKind::Filesystem,
      },
      Error::Unit(e) => match e {
        UnitError::RuntimeSpec(_) => ErrorKind::ExternalTool,
        UnitError::Io { .. } => ErrorKind::Filesystem,
        UnitError::InvalidJson { .. } | UnitError::InvalidConfig { .. } | UnitError::Template(_) => {
          ErrorKind::Validation
        }
      },
      Error::Info(e) => match e {
        InfoError::Write { .. } | InfoError::Serialize(_) => ErrorKind::Filesystem,
        _ => ErrorKind::CorruptState,
      },
      Error::Package(e) => match e {
        PackageError::Command(_) => ErrorKind::ExternalTool,
        PackageError::OstreeBooted => ErrorKind::Validation,
        PackageError::HostFiles(_) | PackageError::Io { .. } | PackageError::NothingBuilt(_) => ErrorKind::Filesystem,
      },
      Error::Backend(e) => match e {
        BackendError::Store(e) => store_kind(e),
        BackendError::Command(_) | BackendError::Parse { .. } => ErrorKind::ExternalTool,
        BackendError::Deployment(e) => e.kind(),
      },
    }
  }
}

fn store_kind(e: &StoreError) -> ErrorKind {
  match e {
    StoreError::NotFound(_) | StoreError::Ambiguous { .. } | StoreError::LayerMissing(_) => ErrorKind::Resolution,
    StoreError::InvalidManifest { .. } | StoreError::CorruptCommit { .. } => ErrorKind::CorruptState,
    StoreError::Io { .. } | StoreError::Hash { .. } | StoreError::Serialize(_) => ErrorKind::Filesystem,
  }
}
