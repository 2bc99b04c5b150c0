use anyhow::{Context, Result};

use hostctr_lib::deploy::Engine;

use crate::output::{print_stat, print_success, symbols};

pub fn cmd_rollback(name: &str) -> Result<()> {
  let ctx = super::load_context()?;
  let slot = Engine::new(&ctx)
    .rollback(name)
    .with_context(|| format!("Failed to roll back {}", name))?;

  print_success(&format!(
    "Rolled back {} {} slot {}",
    name,
    symbols::ARROW,
    slot.index()
  ));
  print_stat("Checkout", &ctx.layout(name).slot_dir(slot).display().to_string());
  Ok(())
}
