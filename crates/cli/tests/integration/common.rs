//! Shared helpers for CLI integration tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Layer digests used by [`TestEnv::write_layout`]; any 64 hex characters do.
pub const BASE_LAYER: &str = "1111111111111111111111111111111111111111111111111111111111111111";
pub const APP_LAYER: &str = "2222222222222222222222222222222222222222222222222222222222222222";

/// Isolated hostctr environment.
///
/// Every path hostctr writes to (checkouts, content store, host files and
/// the user's home) lives below one temporary directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.temp.path().join(name);
    fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn checkout_path(&self) -> PathBuf {
    self.dir("checkouts")
  }

  pub fn store_path(&self) -> PathBuf {
    self.dir("store")
  }

  pub fn sysroot(&self) -> PathBuf {
    self.dir("host")
  }

  pub fn home(&self) -> PathBuf {
    self.dir("home")
  }

  /// A `hostctr` command confined to this environment.
  pub fn hostctr_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("hostctr");
    cmd
      .env("HOSTCTR_CONFIG", self.temp.path().join("hostctr.yaml"))
      .env("HOSTCTR_CHECKOUT_PATH", self.checkout_path())
      .env("HOSTCTR_STORE", self.store_path())
      .env("HOSTCTR_SYSROOT", self.sysroot())
      .env("HOME", self.home())
      .env_remove("RUST_LOG");
    cmd
  }

  /// Write an image layout with a base layer and an app layer exporting a
  /// service template.
  pub fn write_layout(&self) -> PathBuf {
    let dir = self.temp.path().join("layout");
    let files = [
      (BASE_LAYER, "etc/os-release", "ID=test\n"),
      (BASE_LAYER, "usr/bin/app", "#!/bin/sh\n"),
      (
        APP_LAYER,
        "exports/manifest.json",
        r#"{"defaultValues": {"PORT": "80"}}"#,
      ),
      (
        APP_LAYER,
        "exports/service.template",
        "[Service]\nExecStart=$EXEC_START --port $PORT --token $TOKEN\n",
      ),
    ];
    for (layer, path, content) in files {
      let file = dir.join("layers").join(layer).join(path);
      fs::create_dir_all(file.parent().unwrap()).unwrap();
      fs::write(file, content).unwrap();
    }
    let manifest = serde_json::json!({
      "schemaVersion": 2,
      "config": {"digest": "sha256:3333333333333333333333333333333333333333333333333333333333333333"},
      "layers": [
        {"digest": format!("sha256:{}", BASE_LAYER), "size": 10},
        {"digest": format!("sha256:{}", APP_LAYER), "size": 20},
      ],
    });
    fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    dir
  }

  /// Import the layout from [`write_layout`](Self::write_layout) as `image`.
  pub fn import(&self, image: &str) {
    let layout = self.write_layout();
    self
      .hostctr_cmd()
      .arg("import")
      .arg(&layout)
      .arg(image)
      .assert()
      .success();
  }
}
