//! hostctr-lib: system container deployments
//!
//! Images are checked out of a content-addressed store onto the host and run
//! as services of the host service manager:
//! - `store`: image references, manifests and the directory-backed repository
//! - `rootfs`: durable layer checkout
//! - `template` / `values`: `$VAR` templates and the value map
//! - `hostfiles`: checksum-gated host file reconciliation
//! - `unit`: service unit, tmpfiles and OCI configuration generation
//! - `deploy`: install, upgrade, rollback, uninstall and prune
//! - `backend`: uniform image/container listings

pub mod backend;
pub mod config;
pub mod consts;
pub mod deploy;
pub mod error;
pub mod exports;
pub mod hostfiles;
pub mod info;
pub mod package;
pub mod platform;
pub mod rootfs;
pub mod service;
pub mod store;
pub mod template;
pub mod unit;
pub mod util;
pub mod values;

pub use error::{Error, ErrorKind};
