use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn images_empty_store() {
  TestEnv::new()
    .hostctr_cmd()
    .arg("images")
    .assert()
    .success()
    .stdout(predicate::str::contains("No images"));
}

#[test]
fn import_then_list() {
  let env = TestEnv::new();
  let layout = env.write_layout();

  env
    .hostctr_cmd()
    .arg("import")
    .arg(&layout)
    .arg("registry.example.com/app:1.0")
    .assert()
    .success()
    .stdout(predicate::str::contains("Imported registry.example.com/app:1.0"))
    .stdout(predicate::str::contains("Commit"));

  env
    .hostctr_cmd()
    .arg("images")
    .assert()
    .success()
    .stdout(predicate::str::contains("IMAGE ID"))
    .stdout(predicate::str::contains("registry.example.com/app:1.0"));
}

#[test]
fn images_json_output() {
  let env = TestEnv::new();
  env.import("app:1.0");

  let output = env.hostctr_cmd().args(["images", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let images: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let images = images.as_array().unwrap();
  assert_eq!(images.len(), 1);
  assert!(images[0].to_string().contains("app:1.0"));
}

#[test]
fn import_missing_layout_fails() {
  let env = TestEnv::new();
  env
    .hostctr_cmd()
    .arg("import")
    .arg(env.temp.path().join("nowhere"))
    .arg("app:1.0")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to import"));
}

#[test]
fn extract_applies_layers_in_order() {
  let env = TestEnv::new();
  env.import("app:1.0");
  let dest = env.temp.path().join("extracted");

  env
    .hostctr_cmd()
    .arg("extract")
    .arg("app:1.0")
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Extracted app:1.0"));

  assert_eq!(std::fs::read_to_string(dest.join("etc/os-release")).unwrap(), "ID=test\n");
  assert!(dest.join("exports/service.template").exists());
}

#[test]
fn extract_unknown_image_fails() {
  let env = TestEnv::new();
  env
    .hostctr_cmd()
    .arg("extract")
    .arg("missing:1.0")
    .arg(env.temp.path().join("out"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to extract missing:1.0"));
}

#[test]
fn info_shows_image_variables() {
  let env = TestEnv::new();
  env.import("app:1.0");

  env
    .hostctr_cmd()
    .args(["info", "app:1.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("PORT"))
    .stdout(predicate::str::contains("Variables to set with --set"))
    .stdout(predicate::str::contains("TOKEN"));
}

#[test]
fn info_image_json() {
  let env = TestEnv::new();
  env.import("app:1.0");

  let output = env
    .hostctr_cmd()
    .args(["info", "app:1.0", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(info["image"], "app:1.0");
  assert_eq!(info["defaults"]["PORT"], "80");
  assert_eq!(info["required"], serde_json::json!(["TOKEN"]));
}

#[test]
fn image_delete_with_force() {
  let env = TestEnv::new();
  env.import("app:1.0");

  env
    .hostctr_cmd()
    .args(["image-delete", "--force", "app:1.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Deleted app:1.0"));

  env
    .hostctr_cmd()
    .arg("images")
    .assert()
    .success()
    .stdout(predicate::str::contains("No images"));
}

#[test]
fn image_delete_without_terminal_needs_force() {
  let env = TestEnv::new();
  env.import("app:1.0");

  env
    .hostctr_cmd()
    .args(["image-delete", "app:1.0"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
}
