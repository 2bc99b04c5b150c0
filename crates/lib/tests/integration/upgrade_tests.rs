//! Upgrade and rollback between the two slots.

use std::collections::BTreeMap;
use std::fs;

use hostctr_lib::deploy::{ActivationMode, ActivationState, InstallOptions, Slot, UpgradeOptions, UpgradeOutcome};
use hostctr_lib::{Error, ErrorKind};

use super::common::TestEnv;

/// `web` installed from `app:latest` at version 1.
fn installed(controlled: bool) -> TestEnv {
  let env = TestEnv::new();
  env.import_app("app:latest", "1", "8080");
  let options = InstallOptions {
    controlled,
    ..Default::default()
  };
  env.engine().install("web", "app:latest", options).unwrap();
  env
}

/// State a rollback has to reproduce exactly.
fn observable(env: &TestEnv, slot: Slot) -> (String, String, String, BTreeMap<String, String>) {
  let dir = env.slot_dir("web", slot);
  (
    fs::read_to_string(dir.join("config.json")).unwrap(),
    fs::read_to_string(env.unit_path("web")).unwrap(),
    fs::read_to_string(env.tmpfiles_path("web")).unwrap(),
    env.info("web", slot).values,
  )
}

#[test]
fn upgrade_checks_out_the_other_slot() {
  let env = installed(false);
  let v2 = env.import_app("app:latest", "2", "9090");

  let outcome = env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  assert_eq!(
    outcome,
    UpgradeOutcome::Upgraded {
      slot: Slot::One,
      image_id: v2.clone(),
    }
  );
  assert_eq!(env.current_slot("web"), Some(Slot::One));
  assert!(env.slot_dir("web", Slot::Zero).is_dir());

  let info = env.info("web", Slot::One);
  assert_eq!(info.revision, v2);
  // Values recorded by the install carry over.
  assert_eq!(info.values["PORT"], "8080");
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=2\n"
  );
  let unit = fs::read_to_string(env.unit_path("web")).unwrap();
  assert!(unit.contains(&format!("WorkingDirectory={}", env.slot_dir("web", Slot::One).display())));
}

#[test]
fn unchanged_image_is_up_to_date() {
  let env = installed(false);

  let outcome = env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  assert_eq!(outcome, UpgradeOutcome::UpToDate);
  assert_eq!(env.current_slot("web"), Some(Slot::Zero));
  assert!(!env.slot_dir("web", Slot::One).exists());
}

#[test]
fn new_values_force_an_upgrade() {
  let env = installed(false);
  let options = UpgradeOptions {
    values: BTreeMap::from([("PORT".to_string(), "7000".to_string())]),
    ..Default::default()
  };

  let outcome = env.engine().upgrade("web", options).unwrap();

  assert!(matches!(outcome, UpgradeOutcome::Upgraded { slot: Slot::One, .. }));
  assert_eq!(env.info("web", Slot::One).values["PORT"], "7000");
  assert!(fs::read_to_string(env.unit_path("web")).unwrap().contains("--port 7000"));
}

#[test]
fn rebase_switches_image() {
  let env = installed(false);
  let other = env.import_app("app:next", "3", "8080");
  let options = UpgradeOptions {
    rebase: Some("app:next".to_string()),
    ..Default::default()
  };

  env.engine().upgrade("web", options).unwrap();

  let info = env.info("web", Slot::One);
  assert_eq!(info.image, "app:next");
  assert_eq!(info.revision, other);
}

#[test]
fn running_service_is_restarted() {
  let env = installed(true);
  env.import_app("app:latest", "2", "9090");

  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  let calls = env.services.calls();
  let stop = calls.iter().position(|c| c == "stop web").unwrap();
  let start = calls.iter().rposition(|c| c == "start web").unwrap();
  assert!(stop < start);
  assert!(env.services.is_running("web"));
  assert!(calls.contains(&"tmpfiles-remove web.conf".to_string()));
}

#[test]
fn upgrade_of_unknown_deployment_fails() {
  let env = TestEnv::new();

  let err = env.engine().upgrade("web", UpgradeOptions::default()).unwrap_err();

  assert!(matches!(err, Error::NotInstalled(_)));
  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn edited_host_file_survives_upgrade() {
  let env = installed(true);
  let mut files = super::common::app_exports("2", "9090");
  files.push(("exports/hostfs/etc/app/extra.conf".to_string(), "extra\n".to_string()));
  let layer: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
  env.import("app:latest", &[&layer]);
  let extra = env.host_path("/etc/app/extra.conf");
  fs::write(&extra, "local\n").unwrap();

  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  assert_eq!(env.current_slot("web"), Some(Slot::One));
  assert_eq!(fs::read_to_string(&extra).unwrap(), "local\n");
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=2\n"
  );
  let checksums = env.info("web", Slot::One).installed_files_checksum;
  assert!(checksums.contains_key("/etc/app/app.conf"));
  assert!(!checksums.contains_key("/etc/app/extra.conf"));
  assert!(env.services.is_running("web"));
}

#[test]
fn failed_upgrade_leaves_previous_deployment_in_place() {
  let env = installed(true);
  let before = observable(&env, Slot::Zero);
  let mut files = super::common::app_exports("2", "9090");
  files.push(("exports/hostfs/etc/app.d/extra.conf".to_string(), "extra\n".to_string()));
  let layer: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
  env.import("app:latest", &[&layer]);
  let blocker = env.host_path("/etc/app.d");
  fs::write(&blocker, "local\n").unwrap();

  let err = env.engine().upgrade("web", UpgradeOptions::default()).unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Filesystem);
  assert_eq!(env.current_slot("web"), Some(Slot::Zero));
  assert!(!env.slot_dir("web", Slot::One).exists());
  assert_eq!(observable(&env, Slot::Zero), before);
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=1\n"
  );
  assert_eq!(fs::read_to_string(&blocker).unwrap(), "local\n");
  assert!(env.services.is_running("web"));
}

#[test]
fn upgrade_that_adds_a_service_enables_it() {
  let env = TestEnv::new();
  env.import(
    "app:latest",
    &[&[
      ("exports/manifest.json", r#"{"noContainerService": true}"#),
      ("exports/hostfs/etc/app/app.conf", "version=1\n"),
    ]],
  );
  env.engine().install("web", "app:latest", InstallOptions::default()).unwrap();
  assert!(!env.services.is_enabled("web"));
  env.import_app("app:latest", "2", "8080");

  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  assert!(env.info("web", Slot::One).has_container_service);
  assert!(env.unit_path("web").exists());
  assert!(env.services.is_enabled("web"));
}

#[test]
fn upgrade_between_services_does_not_enable_again() {
  let env = installed(false);
  env.import_app("app:latest", "2", "9090");

  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  let enables = env.services.calls().iter().filter(|c| *c == "enable web").count();
  assert_eq!(enables, 1);
}

#[test]
fn rollback_restores_the_previous_deployment() {
  let env = installed(false);
  let before = observable(&env, Slot::Zero);
  let v1_info = env.info("web", Slot::Zero);
  env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();
  assert_ne!(observable(&env, Slot::One), before);

  let slot = env.engine().rollback("web").unwrap();

  assert_eq!(slot, Slot::Zero);
  assert_eq!(env.current_slot("web"), Some(Slot::Zero));
  assert_eq!(observable(&env, Slot::Zero), before);
  let mut info = env.info("web", Slot::Zero);
  info.created = v1_info.created;
  assert_eq!(info, v1_info);
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=1\n"
  );
}

#[test]
fn rollback_twice_returns_to_the_upgrade() {
  let env = installed(false);
  let v2 = env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  env.engine().rollback("web").unwrap();
  let slot = env.engine().rollback("web").unwrap();

  assert_eq!(slot, Slot::One);
  assert_eq!(env.info("web", Slot::One).revision, v2);
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=2\n"
  );
}

#[test]
fn rollback_keeps_a_stopped_service_stopped() {
  let env = installed(false);
  env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  env.engine().rollback("web").unwrap();

  assert!(!env.services.is_running("web"));
  assert!(!env.services.calls().contains(&"start web".to_string()));
}

#[test]
fn rollback_without_previous_deployment_fails() {
  let env = installed(false);

  let err = env.engine().rollback("web").unwrap_err();

  assert!(matches!(err, Error::NoPreviousDeployment(ref name) if name == "web"));
  assert_eq!(env.current_slot("web"), Some(Slot::Zero));
}

#[test]
fn failed_rollback_restores_the_current_deployment() {
  let env = TestEnv::new();
  let mut files = super::common::app_exports("1", "8080");
  files.push(("exports/hostfs/etc/app.d/extra.conf".to_string(), "extra\n".to_string()));
  let layer: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
  env.import("app:latest", &[&layer]);
  let options = InstallOptions {
    controlled: true,
    ..Default::default()
  };
  env.engine().install("web", "app:latest", options).unwrap();
  env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();
  let before = observable(&env, Slot::One);
  // Version 1 needs /etc/app.d back as a directory.
  let blocker = env.host_path("/etc/app.d");
  fs::remove_dir_all(&blocker).unwrap();
  fs::write(&blocker, "local\n").unwrap();

  let err = env.engine().rollback("web").unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Filesystem);
  assert_eq!(env.current_slot("web"), Some(Slot::One));
  assert_eq!(observable(&env, Slot::One), before);
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=2\n"
  );
  assert_eq!(fs::read_to_string(&blocker).unwrap(), "local\n");
  assert!(env.services.is_running("web"));
  let calls = env.services.calls();
  let stop = calls.iter().rposition(|c| c == "stop web").unwrap();
  let start = calls.iter().rposition(|c| c == "start web").unwrap();
  assert!(stop < start);
}

#[test]
fn controlled_upgrade_that_fails_to_start_rolls_back() {
  let env = installed(true);
  let v1 = env.info("web", Slot::Zero).revision;
  env.import_app("app:latest", "2", "9090");
  env.services.fail_next_starts(1);
  let options = UpgradeOptions {
    mode: ActivationMode::Controlled,
    ..Default::default()
  };

  let err = env.engine().upgrade("web", options).unwrap_err();

  match &err {
    Error::ActivationFailed { name, state, source } => {
      assert_eq!(name, "web");
      assert_eq!(*state, ActivationState::RolledBack);
      assert!(source.to_string().contains("main process exited"), "{source}");
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(env.current_slot("web"), Some(Slot::Zero));
  assert_eq!(env.info("web", Slot::Zero).revision, v1);
  assert!(env.services.is_running("web"));
  assert_eq!(
    fs::read_to_string(env.host_path("/etc/app/app.conf")).unwrap(),
    "version=1\n"
  );
}

#[test]
fn plain_upgrade_that_fails_to_start_stays_on_new_slot() {
  let env = installed(true);
  env.import_app("app:latest", "2", "9090");
  env.services.fail_next_starts(1);

  let err = env.engine().upgrade("web", UpgradeOptions::default()).unwrap_err();

  assert!(matches!(
    err,
    Error::ActivationFailed {
      state: ActivationState::StartFailed,
      ..
    }
  ));
  assert_eq!(env.current_slot("web"), Some(Slot::One));
  assert!(!env.services.is_running("web"));
}
