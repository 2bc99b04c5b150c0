//! Implementation of the `hostctr update` command.

use anyhow::{Context, Result};

use hostctr_lib::deploy::{ActivationMode, Engine, UpgradeOptions, UpgradeOutcome};
use hostctr_lib::values::parse_set_values;

use crate::output::{print_info, print_stat, print_success, truncate_hash};

pub fn cmd_update(name: &str, set: &[String], rebase: Option<String>, controlled: bool) -> Result<()> {
  let values = parse_set_values(set)?;
  let ctx = super::load_context()?;
  let options = UpgradeOptions {
    values,
    rebase,
    mode: if controlled {
      ActivationMode::Controlled
    } else {
      ActivationMode::Plain
    },
  };

  let outcome = Engine::new(&ctx)
    .upgrade(name, options)
    .with_context(|| format!("Failed to update {}", name))?;

  match outcome {
    UpgradeOutcome::UpToDate => print_info(&format!("{} is already up to date", name)),
    UpgradeOutcome::Upgraded { slot, image_id } => {
      print_success(&format!("Updated {}", name));
      print_stat("Image", truncate_hash(&image_id));
      print_stat("Checkout", &ctx.layout(name).slot_dir(slot).display().to_string());
    }
  }

  Ok(())
}
