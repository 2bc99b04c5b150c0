//! Implementation of the `hostctr info` command.
//!
//! An installed container shows its deployment; anything else is looked up
//! as an image and shows its template variables.

use anyhow::{Context, Result};

use hostctr_lib::deploy::{DeploymentInfo, Engine};

use crate::output::{OutputFormat, format_timestamp, print_json, print_stat, print_success, symbols};

pub fn cmd_info(target: &str, output: OutputFormat) -> Result<()> {
  let ctx = super::load_context()?;
  let engine = Engine::new(&ctx);

  if ctx.layout(target).is_installed() {
    let info = engine
      .info(target)
      .with_context(|| format!("Failed to read container {}", target))?;
    if output.is_json() {
      return print_json(&info);
    }
    print_deployment(&info);
    return Ok(());
  }

  let (defaults, required) = engine
    .template_variables(target)
    .with_context(|| format!("{} is neither an installed container nor a known image", target))?;

  if output.is_json() {
    return print_json(&serde_json::json!({
      "image": target,
      "defaults": defaults,
      "required": required,
    }));
  }

  print_success(&format!("Image {}", target));
  if !defaults.is_empty() {
    println!();
    println!("Variables with a default:");
    for (name, value) in &defaults {
      print_stat(name, value);
    }
  }
  if !required.is_empty() {
    println!();
    println!("Variables to set with --set:");
    for name in &required {
      println!("  {} {}", symbols::INFO, name);
    }
  }
  Ok(())
}

fn print_deployment(info: &DeploymentInfo) {
  let record = &info.info;
  print_success(&format!("Container {}", info.name));
  print_stat("Image", &record.image);
  print_stat("Revision", &record.revision);
  print_stat("Created", &format_timestamp(record.created));
  print_stat("Checkout", &info.path.display().to_string());
  print_stat("Slot", &info.slot.to_string());
  print_stat("Status", info.status.as_str());
  print_stat("Runtime", record.runtime.as_str());
  print_stat("System package", record.system_package.as_str());
  print_stat("Rollback available", if info.has_previous { "yes" } else { "no" });
  if let Some(remote) = &record.remote {
    print_stat("Remote rootfs", remote);
  }

  if !record.values.is_empty() {
    println!();
    println!("Values:");
    for (name, value) in &record.values {
      print_stat(name, value);
    }
  }
  if !record.installed_files_checksum.is_empty() {
    println!();
    println!("Host files:");
    for path in record.installed_files_checksum.keys() {
      println!("  {} {}", symbols::INFO, path);
    }
  }
}
