//! Implementation of the `hostctr install` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use hostctr_lib::deploy::{Engine, InstallOptions, InstallOutcome};
use hostctr_lib::info::SystemPackage;
use hostctr_lib::store::ImageRef;
use hostctr_lib::values::parse_set_values;

use crate::output::{print_info, print_stat, print_success};

pub struct InstallArgs {
  pub image: String,
  pub name: Option<String>,
  pub set: Vec<String>,
  pub system_package: SystemPackage,
  pub remote: Option<PathBuf>,
  pub controlled: bool,
  pub package_dir: Option<PathBuf>,
}

pub fn cmd_install(args: InstallArgs) -> Result<()> {
  let values = parse_set_values(&args.set)?;
  let name = args
    .name
    .unwrap_or_else(|| ImageRef::parse(&args.image).default_container_name());

  let ctx = super::load_context()?;
  let options = InstallOptions {
    values,
    system_package: args.system_package,
    remote: args.remote,
    controlled: args.controlled,
    package_dir: args.package_dir,
  };

  let outcome = Engine::new(&ctx)
    .install(&name, &args.image, options)
    .with_context(|| format!("Failed to install {} as {}", args.image, name))?;

  match outcome {
    InstallOutcome::Installed { slot, values, started } => {
      print_success(&format!("Installed {} as {}", args.image, name));
      print_stat("Checkout", &ctx.layout(&name).slot_dir(slot).display().to_string());
      print_stat("Values", &values.iter().count().to_string());
      if started {
        print_info(&format!("Service {} started", name));
      } else {
        let user = if ctx.config.user { "--user " } else { "" };
        print_info(&format!("Start it with: systemctl {}start {}", user, name));
      }
    }
    InstallOutcome::PackageBuilt(path) => {
      print_success(&format!("Generated package {}", path.display()));
    }
  }

  Ok(())
}
