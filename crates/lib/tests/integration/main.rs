//! Deployment engine tests against recording fakes of systemd and rpm.

mod common;

mod query_tests;
mod uninstall_tests;
mod upgrade_tests;
