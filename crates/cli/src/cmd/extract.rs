use std::path::Path;

use anyhow::{Context, Result};

use hostctr_lib::deploy::Engine;

use crate::output::{print_stat, print_success};

pub fn cmd_extract(image: &str, destination: &Path) -> Result<()> {
  let ctx = super::load_context()?;
  let layers = Engine::new(&ctx)
    .extract(image, destination)
    .with_context(|| format!("Failed to extract {}", image))?;

  print_success(&format!("Extracted {} to {}", image, destination.display()));
  print_stat("Layers", &layers.len().to_string());
  Ok(())
}
