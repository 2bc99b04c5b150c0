use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn help_lists_commands() {
  TestEnv::new()
    .hostctr_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("install"))
    .stdout(predicate::str::contains("rollback"))
    .stdout(predicate::str::contains("image-delete"));
}

#[test]
fn version_flag() {
  TestEnv::new()
    .hostctr_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("hostctr"));
}

#[test]
fn install_help_shows_options() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["install", "--help"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--set"))
    .stdout(predicate::str::contains("--system-package"))
    .stdout(predicate::str::contains("--controlled"));
}

#[test]
fn unknown_subcommand_fails() {
  TestEnv::new().hostctr_cmd().arg("apply").assert().failure();
}

#[test]
fn image_delete_requires_an_image() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["image-delete", "--force"])
    .assert()
    .failure();
}

#[test]
fn invalid_system_package_mode_is_rejected() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["install", "app", "--system-package", "sometimes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("sometimes"));
}

#[test]
fn invalid_storage_is_rejected() {
  TestEnv::new()
    .hostctr_cmd()
    .args(["images", "--storage", "podman"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("expected content-store or daemon"));
}
