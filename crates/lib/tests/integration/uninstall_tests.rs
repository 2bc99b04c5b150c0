//! Uninstall and prune.

use std::fs;

use hostctr_lib::deploy::{InstallOptions, Slot, UpgradeOptions};
use hostctr_lib::info::SystemPackage;

use super::common::TestEnv;

fn installed(name: &str) -> TestEnv {
  let env = TestEnv::new();
  env.import_app("app:latest", "1", "8080");
  let options = InstallOptions {
    controlled: true,
    ..Default::default()
  };
  env.engine().install(name, "app:latest", options).unwrap();
  env
}

#[test]
fn uninstall_removes_everything_it_installed() {
  let env = installed("web");

  assert!(env.engine().uninstall("web").unwrap());

  assert!(!env.checkout_dir().join("web").exists());
  assert!(!env.checkout_dir().join("web").is_symlink());
  assert!(!env.slot_dir("web", Slot::Zero).exists());
  assert!(!env.slot_dir("web", Slot::One).exists());
  assert!(!env.unit_path("web").exists());
  assert!(!env.tmpfiles_path("web").exists());
  assert!(!env.host_path("/etc/app/app.conf").exists());
  assert!(!env.services.is_running("web"));
  assert!(!env.services.is_enabled("web"));
  let calls = env.services.calls();
  assert!(calls.contains(&"tmpfiles-remove web.conf".to_string()));
  assert_eq!(calls.last().map(String::as_str), Some("daemon-reload"));
}

#[test]
fn modified_host_files_survive_uninstall() {
  let env = installed("web");
  let conf = env.host_path("/etc/app/app.conf");
  fs::write(&conf, "version=1\nlocal=edit\n").unwrap();

  env.engine().uninstall("web").unwrap();

  assert_eq!(fs::read_to_string(&conf).unwrap(), "version=1\nlocal=edit\n");
  assert!(!env.checkout_dir().join("web").exists());
}

#[test]
fn uninstall_of_unknown_deployment_is_a_no_op() {
  let env = TestEnv::new();

  assert!(!env.engine().uninstall("web").unwrap());
  assert!(env.services.calls().is_empty());
}

#[test]
fn uninstall_after_upgrade_removes_both_slots() {
  let env = installed("web");
  env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  env.engine().uninstall("web").unwrap();

  assert!(!env.slot_dir("web", Slot::Zero).exists());
  assert!(!env.slot_dir("web", Slot::One).exists());
  assert!(!env.host_path("/etc/app/app.conf").exists());
}

#[test]
fn uninstall_tolerates_a_corrupt_info_record() {
  let env = installed("web");
  fs::write(env.slot_dir("web", Slot::Zero).join("info"), "{broken").unwrap();

  assert!(env.engine().uninstall("web").unwrap());

  assert!(!env.checkout_dir().join("web").is_symlink());
  assert!(!env.slot_dir("web", Slot::Zero).exists());
  assert!(!env.unit_path("web").exists());
}

#[test]
fn uninstall_removes_the_system_package() {
  let env = TestEnv::new();
  env.import_app("app:latest", "1", "8080");
  let options = InstallOptions {
    system_package: SystemPackage::Yes,
    ..Default::default()
  };
  env.engine().install("web", "app:latest", options).unwrap();

  env.engine().uninstall("web").unwrap();

  assert_eq!(
    env.packager.calls().last().map(String::as_str),
    Some("uninstall hostctr-container-web")
  );
}

#[test]
fn prune_deletes_unreferenced_slots() {
  let env = installed("web");
  env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();
  let orphan = env.checkout_dir().join("old.1");
  fs::create_dir_all(orphan.join("rootfs")).unwrap();
  fs::write(orphan.join("rootfs/file"), "12345").unwrap();

  let stats = env.engine().prune().unwrap();

  assert_eq!(stats.checkouts_deleted, 2);
  assert!(stats.checkouts_bytes_freed >= 5);
  assert!(!orphan.exists());
  assert!(!env.slot_dir("web", Slot::Zero).exists());
  assert!(env.slot_dir("web", Slot::One).is_dir());
  assert_eq!(env.current_slot("web"), Some(Slot::One));
}

#[test]
fn prune_keeps_images_in_use() {
  let env = installed("web");

  env.engine().prune().unwrap();
  env.engine().uninstall("web").unwrap();

  let options = InstallOptions::default();
  env.engine().install("web", "app:latest", options).unwrap();
  assert_eq!(env.current_slot("web"), Some(Slot::Zero));
}
