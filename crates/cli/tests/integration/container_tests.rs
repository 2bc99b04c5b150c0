use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn containers_empty() {
  TestEnv::new()
    .hostctr_cmd()
    .arg("containers")
    .assert()
    .success()
    .stdout(predicate::str::contains("No containers"));
}

#[test]
fn containers_json_empty() {
  let output = TestEnv::new()
    .hostctr_cmd()
    .args(["containers", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());
  let containers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(containers, serde_json::json!([]));
}

#[test]
fn prune_empty_store() {
  TestEnv::new()
    .hostctr_cmd()
    .arg("prune")
    .assert()
    .success()
    .stdout(predicate::str::contains("Prune complete!"));
}

#[test]
fn prune_json_reports_removed_checkouts() {
  let env = TestEnv::new();
  std::fs::create_dir_all(env.checkout_path().join("old.0")).unwrap();

  let output = env.hostctr_cmd().args(["prune", "-o", "json"]).output().unwrap();
  assert!(output.status.success());

  let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(stats["checkouts_deleted"], 1);
  assert!(!env.checkout_path().join("old.0").exists());
}

#[test]
fn uninstall_unknown_container() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["uninstall", "web"])
    .assert()
    .success()
    .stdout(predicate::str::contains("web is not installed"));
}

#[test]
fn info_unknown_target_fails() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["info", "nothing"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("neither an installed container nor a known image"));
}

#[test]
fn update_unknown_container_fails() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["update", "web"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to update web"));
}

#[test]
fn rollback_unknown_container_fails() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["rollback", "web"])
    .assert()
    .failure();
}

#[test]
fn install_rejects_malformed_set() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["install", "app:1.0", "--set", "PORT"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("expected the form NAME=VALUE"));
}

#[test]
fn install_missing_image_fails() {
  let env = TestEnv::new();
  env
    .hostctr_cmd()
    .args(["install", "missing:1.0", "--name", "web"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to install missing:1.0 as web"));

  assert!(!env.checkout_path().join("web").exists());
}

#[test]
fn install_missing_values_fails() {
  let env = TestEnv::new();
  env.import("app:1.0");

  env
    .hostctr_cmd()
    .args(["install", "app:1.0", "--name", "web"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("TOKEN"));

  assert!(!env.checkout_path().join("web").exists());
  assert!(!env.checkout_path().join("web.0").exists());
}
