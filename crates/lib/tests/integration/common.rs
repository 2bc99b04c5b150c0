//! Shared fixtures for deployment integration tests.
//!
//! Every test gets its own checkout root, store and sysroot inside a temp
//! directory, and talks to recording fakes instead of systemd and rpm.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hostctr_lib::backend::BackendKind;
use hostctr_lib::config::Config;
use hostctr_lib::deploy::{Context, Engine, Slot};
use hostctr_lib::info::InfoRecord;
use hostctr_lib::package::{PackageError, PackageRequest, Packager, package_name};
use hostctr_lib::platform::{HostIdentity, HostProbe, Runtime, RuntimeFeatures};
use hostctr_lib::service::{ServiceError, ServiceManager};
use hostctr_lib::store::FsRepo;
use hostctr_lib::util::process::CommandError;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub fn sha256(text: &str) -> String {
  hex::encode(Sha256::digest(text.as_bytes()))
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ServiceState {
  pub calls: Vec<String>,
  pub active: BTreeSet<String>,
  pub enabled: BTreeSet<String>,
  pub failed: BTreeSet<String>,
  /// Number of upcoming `start` calls that fail.
  pub failing_starts: usize,
}

/// Records every call; `start` succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeServices {
  state: Mutex<ServiceState>,
}

impl FakeServices {
  pub fn fail_next_starts(&self, count: usize) {
    self.state.lock().unwrap().failing_starts = count;
  }

  pub fn calls(&self) -> Vec<String> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn is_running(&self, name: &str) -> bool {
    self.state.lock().unwrap().active.contains(name)
  }

  pub fn is_enabled(&self, name: &str) -> bool {
    self.state.lock().unwrap().enabled.contains(name)
  }

  fn record(&self, call: String) {
    self.state.lock().unwrap().calls.push(call);
  }
}

impl ServiceManager for FakeServices {
  fn daemon_reload(&self) -> Result<(), ServiceError> {
    self.record("daemon-reload".to_string());
    Ok(())
  }

  fn enable(&self, name: &str) -> Result<(), ServiceError> {
    self.record(format!("enable {}", name));
    self.state.lock().unwrap().enabled.insert(name.to_string());
    Ok(())
  }

  fn disable(&self, name: &str) -> Result<(), ServiceError> {
    self.record(format!("disable {}", name));
    self.state.lock().unwrap().enabled.remove(name);
    Ok(())
  }

  fn start(&self, name: &str) -> Result<(), ServiceError> {
    self.record(format!("start {}", name));
    let mut state = self.state.lock().unwrap();
    if state.failing_starts > 0 {
      state.failing_starts -= 1;
      state.failed.insert(name.to_string());
      return Err(ServiceError::Command {
        action: "start",
        unit: name.to_string(),
        source: CommandError::Failed {
          command: format!("systemctl start {}", name),
          code: Some(1),
          stderr: "main process exited".to_string(),
        },
      });
    }
    state.failed.remove(name);
    state.active.insert(name.to_string());
    Ok(())
  }

  fn stop(&self, name: &str) -> Result<(), ServiceError> {
    self.record(format!("stop {}", name));
    self.state.lock().unwrap().active.remove(name);
    Ok(())
  }

  fn is_active(&self, name: &str) -> bool {
    self.is_running(name)
  }

  fn is_failed(&self, name: &str) -> bool {
    self.state.lock().unwrap().failed.contains(name)
  }

  fn tmpfiles_create(&self, conf: &Path) -> Result<(), ServiceError> {
    self.record(format!("tmpfiles-create {}", file_name(conf)));
    Ok(())
  }

  fn tmpfiles_remove(&self, conf: &Path) -> Result<(), ServiceError> {
    self.record(format!("tmpfiles-remove {}", file_name(conf)));
    Ok(())
  }
}

fn file_name(path: &Path) -> String {
  path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Writes a placeholder package instead of running rpmbuild.
#[derive(Debug, Default)]
pub struct FakePackager {
  calls: Mutex<Vec<String>>,
}

impl FakePackager {
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Packager for FakePackager {
  fn build(&self, request: &PackageRequest, dest_dir: &Path) -> Result<PathBuf, PackageError> {
    let path = dest_dir.join(format!("{}-1.0-1.x86_64.rpm", package_name(request.name)));
    fs::create_dir_all(dest_dir).map_err(|source| PackageError::Io {
      path: dest_dir.to_path_buf(),
      source,
    })?;
    fs::write(&path, request.image_id).map_err(|source| PackageError::Io {
      path: path.clone(),
      source,
    })?;
    self.calls.lock().unwrap().push(format!("build {}", request.name));
    Ok(path)
  }

  fn install(&self, package: &Path) -> Result<(), PackageError> {
    self.calls.lock().unwrap().push(format!("install {}", file_name(package)));
    Ok(())
  }

  fn uninstall(&self, package: &str) -> Result<(), PackageError> {
    self.calls.lock().unwrap().push(format!("uninstall {}", package));
    Ok(())
  }
}

/// A privileged host without a container runtime, so `config.json` comes
/// from the image.
pub struct FakeProbe {
  home: PathBuf,
}

impl HostProbe for FakeProbe {
  fn identity(&self) -> HostIdentity {
    HostIdentity {
      uid: 0,
      gid: 0,
      user: false,
      home: self.home.clone(),
      runtime_dir: PathBuf::from("/run"),
    }
  }

  fn runtime_features(&self, _user: bool) -> RuntimeFeatures {
    RuntimeFeatures::unavailable(Runtime::Runc)
  }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Files of one layer: `(path, content)`.
pub type Layer<'a> = &'a [(&'a str, &'a str)];

/// Exports shared by the `app` test images, parameterized by version.
pub fn app_exports(version: &str, port: &str) -> Vec<(String, String)> {
  vec![
    (
      "exports/manifest.json".to_string(),
      format!(r#"{{"defaultValues": {{"PORT": "{}"}}}}"#, port),
    ),
    (
      "exports/service.template".to_string(),
      "[Unit]\nDescription=$NAME\n\n[Service]\nExecStart=$EXEC_START --port $PORT\nWorkingDirectory=$DESTDIR\n"
        .to_string(),
    ),
    (
      "exports/tmpfiles.template".to_string(),
      "d $RUN_DIRECTORY/$NAME 0700 $HOST_UID $HOST_GID - -\n".to_string(),
    ),
    (
      "exports/config.json.template".to_string(),
      r#"{"root": {"path": "rootfs", "readonly": true}, "process": {"args": ["/usr/bin/app", "--port", "$PORT"]}}"#
        .to_string(),
    ),
    ("exports/hostfs/etc/app/app.conf".to_string(), format!("version={}\n", version)),
    ("usr/bin/app".to_string(), format!("#!/bin/sh\necho {}\n", version)),
  ]
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Isolated deployment environment.
pub struct TestEnv {
  pub temp: TempDir,
  pub ctx: Context,
  pub services: Arc<FakeServices>,
  pub packager: Arc<FakePackager>,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let config = Config {
      checkout_dir: root.join("checkouts"),
      store_dir: root.join("store"),
      sysroot: root.join("host"),
      backend: BackendKind::ContentStore,
      use_links: false,
      user: false,
    };
    fs::create_dir_all(&config.checkout_dir).unwrap();
    fs::create_dir_all(&config.sysroot).unwrap();

    let store = FsRepo::open(&config.store_dir).unwrap();
    let services = Arc::new(FakeServices::default());
    let packager = Arc::new(FakePackager::default());
    let probe = FakeProbe { home: root.join("home") };
    let ctx = Context::new(config, Box::new(store), services.clone(), packager.clone(), &probe);

    Self {
      temp,
      ctx,
      services,
      packager,
    }
  }

  pub fn engine(&self) -> Engine<'_> {
    Engine::new(&self.ctx)
  }

  pub fn checkout_dir(&self) -> &Path {
    &self.ctx.config.checkout_dir
  }

  /// Real path of a logical host path.
  pub fn host_path(&self, logical: &str) -> PathBuf {
    self.ctx.config.sysroot.join(logical.trim_start_matches('/'))
  }

  pub fn unit_path(&self, name: &str) -> PathBuf {
    self.ctx.config.unit_dir().join(format!("{}.service", name))
  }

  pub fn tmpfiles_path(&self, name: &str) -> PathBuf {
    self.ctx.config.tmpfiles_dir().join(format!("{}.conf", name))
  }

  pub fn slot_dir(&self, name: &str, slot: Slot) -> PathBuf {
    self.checkout_dir().join(format!("{}.{}", name, slot.index()))
  }

  /// The slot the deployment symlink points at.
  pub fn current_slot(&self, name: &str) -> Option<Slot> {
    self.ctx.layout(name).current_slot().unwrap()
  }

  pub fn info(&self, name: &str, slot: Slot) -> InfoRecord {
    InfoRecord::load(&self.slot_dir(name, slot)).unwrap()
  }

  /// Import a schema 2 image whose layers (base first) hold the given
  /// files. Returns the image id.
  pub fn import(&self, image: &str, layers: &[Layer]) -> String {
    let digests = layer_digests(image, layers);
    let dir = self.write_layers(image, layers, &digests);
    let descriptors: Vec<_> = digests
      .iter()
      .map(|d| serde_json::json!({"digest": format!("sha256:{}", d), "size": 10}))
      .collect();
    let manifest = serde_json::json!({
      "schemaVersion": 2,
      "config": {"digest": format!("sha256:{}", sha256(&digests.join(",")))},
      "layers": descriptors,
    });
    self.finish_import(image, &dir, manifest)
  }

  /// Import a schema 1 image: `fsLayers` lists the top layer first.
  pub fn import_schema1(&self, image: &str, layers: &[Layer]) -> String {
    let digests = layer_digests(image, layers);
    let dir = self.write_layers(image, layers, &digests);
    let fs_layers: Vec<_> = digests
      .iter()
      .rev()
      .map(|d| serde_json::json!({"blobSum": format!("sha256:{}", d)}))
      .collect();
    let manifest = serde_json::json!({
      "schemaVersion": 1,
      "Digest": format!("sha256:{}", sha256(&digests.join(","))),
      "fsLayers": fs_layers,
    });
    self.finish_import(image, &dir, manifest)
  }

  /// Import the `app` image at `version` with `PORT` defaulting to `port`.
  pub fn import_app(&self, image: &str, version: &str, port: &str) -> String {
    let files = app_exports(version, port);
    let layer: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    self.import(image, &[&layer])
  }

  fn write_layers(&self, image: &str, layers: &[Layer], digests: &[String]) -> PathBuf {
    let dir = self.temp.path().join("layouts").join(image.replace([':', '/'], "_"));
    if dir.exists() {
      fs::remove_dir_all(&dir).unwrap();
    }
    for (files, digest) in layers.iter().zip(digests) {
      let layer_dir = dir.join("layers").join(digest);
      fs::create_dir_all(&layer_dir).unwrap();
      for (path, content) in files.iter() {
        let file = layer_dir.join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
      }
    }
    dir
  }

  fn finish_import(&self, image: &str, dir: &Path, manifest: serde_json::Value) -> String {
    fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    let repo = FsRepo::open(&self.ctx.config.store_dir).unwrap();
    repo.import_image(dir, image).unwrap();
    hostctr_lib::store::Revision::resolve(self.ctx.store.as_ref(), image)
      .unwrap()
      .image_id
  }
}

/// Layer digests derived from the image name, position and content, so a
/// re-import with new content gets new layers and a new image id.
fn layer_digests(image: &str, layers: &[Layer]) -> Vec<String> {
  layers
    .iter()
    .enumerate()
    .map(|(i, files)| {
      let content: Vec<String> = files.iter().map(|(p, c)| format!("{}={}", p, c)).collect();
      sha256(&format!("{}#{}#{}", image, i, content.join(";")))
    })
    .collect()
}

/// Every file below `root` with its content, for before/after comparisons.
pub fn snapshot_tree(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
  let mut entries: Vec<_> = walkdir::WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .flatten()
    .map(|e| {
      let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
      let content = if e.file_type().is_file() {
        Some(fs::read(e.path()).unwrap())
      } else {
        None
      };
      (rel, content)
    })
    .collect();
  entries.sort();
  entries
}
