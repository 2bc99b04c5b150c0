use anyhow::{Context, Result};

use hostctr_lib::deploy::Engine;

use crate::output::{print_info, print_success};

pub fn cmd_uninstall(name: &str) -> Result<()> {
  let ctx = super::load_context()?;
  let removed = Engine::new(&ctx)
    .uninstall(name)
    .with_context(|| format!("Failed to uninstall {}", name))?;

  if removed {
    print_success(&format!("Uninstalled {}", name));
  } else {
    print_info(&format!("{} is not installed", name));
  }
  Ok(())
}
