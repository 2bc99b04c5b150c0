//! Listings, template variables and image extraction.

use std::collections::BTreeMap;
use std::fs;

use hostctr_lib::ErrorKind;
use hostctr_lib::deploy::{InstallOptions, UpgradeOptions};
use hostctr_lib::service::ServiceStatus;

use super::common::TestEnv;

const BASE: &[(&str, &str)] = &[
  ("etc/order", "A"),
  ("etc/base-only", "base"),
  ("usr/share/doc/readme", "doc"),
];
const MIDDLE: &[(&str, &str)] = &[("etc/order", "B"), ("etc/middle-only", "middle")];
const TOP: &[(&str, &str)] = &[
  ("etc/order", "C"),
  ("etc/.wh.base-only", ""),
  ("usr/share/doc/.wh..wh..opq", ""),
  ("usr/share/doc/new", "new"),
];

#[test]
fn layers_apply_base_first() {
  let env = TestEnv::new();
  env.import("layered:1", &[BASE, MIDDLE, TOP]);
  let dest = env.temp.path().join("extracted");

  let layers = env.engine().extract("layered:1", &dest).unwrap();

  assert_eq!(layers.len(), 3);
  assert_eq!(fs::read_to_string(dest.join("etc/order")).unwrap(), "C");
  assert_eq!(fs::read_to_string(dest.join("etc/middle-only")).unwrap(), "middle");
  assert!(!dest.join("etc/base-only").exists());
  assert!(!dest.join("etc/.wh.base-only").exists());
  assert!(!dest.join("usr/share/doc/readme").exists());
  assert_eq!(fs::read_to_string(dest.join("usr/share/doc/new")).unwrap(), "new");
}

#[test]
fn schema1_manifests_apply_in_the_same_order() {
  let env = TestEnv::new();
  env.import_schema1("layered:1", &[BASE, MIDDLE, TOP]);
  let dest = env.temp.path().join("extracted");

  env.engine().extract("layered:1", &dest).unwrap();

  assert_eq!(fs::read_to_string(dest.join("etc/order")).unwrap(), "C");
  assert!(!dest.join("etc/base-only").exists());
}

#[test]
fn extract_of_unknown_image_fails() {
  let env = TestEnv::new();

  let err = env
    .engine()
    .extract("missing:1", &env.temp.path().join("out"))
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Resolution);
}

#[test]
fn containers_lists_deployments_by_name() {
  let env = TestEnv::new();
  let image_id = env.import_app("app:latest", "1", "8080");
  env.engine().install("web", "app:latest", InstallOptions::default()).unwrap();
  env.import("tool:1", &[&[("usr/bin/tool", "#!/bin/sh\n")]]);
  let controlled = InstallOptions {
    controlled: true,
    ..Default::default()
  };
  env.engine().install("api", "tool:1", controlled).unwrap();

  let containers = env.engine().containers().unwrap();

  let names: Vec<_> = containers.iter().map(|c| c.id.as_str()).collect();
  assert_eq!(names, vec!["api", "web"]);
  let web = &containers[1];
  assert_eq!(web.image, "app:latest");
  assert_eq!(web.image_id, image_id);
  assert_eq!(web.command, "/usr/bin/app --port 8080");
  assert_eq!(web.runtime, "runc");
  assert_eq!(web.status, "inactive");
  assert_eq!(containers[0].status, "running");
}

#[test]
fn containers_is_empty_without_deployments() {
  let env = TestEnv::new();

  assert!(env.engine().containers().unwrap().is_empty());
}

#[test]
fn info_reports_slot_and_previous() {
  let env = TestEnv::new();
  env.import_app("app:latest", "1", "8080");
  env.engine().install("web", "app:latest", InstallOptions::default()).unwrap();

  let info = env.engine().info("web").unwrap();
  assert_eq!(info.slot, 0);
  assert!(!info.has_previous);
  assert_eq!(info.status, ServiceStatus::Inactive);

  env.import_app("app:latest", "2", "9090");
  env.engine().upgrade("web", UpgradeOptions::default()).unwrap();

  let info = env.engine().info("web").unwrap();
  assert_eq!(info.slot, 1);
  assert!(info.has_previous);
  assert_eq!(info.path, env.slot_dir("web", hostctr_lib::deploy::Slot::One));
}

#[test]
fn info_of_unknown_deployment_fails() {
  let env = TestEnv::new();

  let err = env.engine().info("web").unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn template_variables_split_defaults_from_required() {
  let env = TestEnv::new();
  env.import(
    "needs:1",
    &[&[
      ("exports/manifest.json", r#"{"defaultValues": {"PORT": 80}}"#),
      (
        "exports/service.template",
        "[Service]\nExecStart=$EXEC_START --port $PORT --token $TOKEN\n",
      ),
    ]],
  );

  let (defaults, required) = env.engine().template_variables("needs:1").unwrap();

  assert_eq!(defaults.get("PORT").map(String::as_str), Some("80"));
  assert!(defaults.contains_key("RUN_DIRECTORY"));
  assert!(!defaults.contains_key("EXEC_START"));
  assert_eq!(required.into_iter().collect::<Vec<_>>(), vec!["TOKEN".to_string()]);

  let values = BTreeMap::from([("TOKEN".to_string(), "s3cret".to_string())]);
  let options = InstallOptions {
    values,
    ..Default::default()
  };
  env.engine().install("svc", "needs:1", options).unwrap();
  assert!(
    fs::read_to_string(env.unit_path("svc"))
      .unwrap()
      .contains("--token s3cret")
  );
}
