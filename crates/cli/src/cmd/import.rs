use std::path::Path;

use anyhow::{Context, Result};

use hostctr_lib::store::FsRepo;

use crate::output::{print_stat, print_success, truncate_hash};

pub fn cmd_import(layout: &Path, image: &str) -> Result<()> {
  let config = super::load_config()?;
  let repo = FsRepo::open(&config.store_dir).context("Failed to open the content store")?;

  let imported = repo
    .import_image(layout, image)
    .with_context(|| format!("Failed to import {}", layout.display()))?;

  print_success(&format!("Imported {}", image));
  print_stat("Branch", &imported.branch);
  print_stat("Commit", truncate_hash(&imported.commit));
  Ok(())
}
