use anyhow::{Context, Result};

use hostctr_lib::backend::BackendKind;

use crate::output::{OutputFormat, Table, format_bytes, format_timestamp, print_info, print_json, truncate_hash};

pub fn cmd_images(all: bool, storage: Option<BackendKind>, output: OutputFormat) -> Result<()> {
  let ctx = super::load_context()?;
  let backend = super::backend(&ctx, storage);
  let images = backend
    .images(all)
    .with_context(|| format!("Failed to list images from {}", backend.kind()))?;

  if output.is_json() {
    return print_json(&images);
  }

  if images.is_empty() {
    print_info("No images");
    return Ok(());
  }

  let mut table = Table::new(&["IMAGE", "IMAGE ID", "CREATED", "SIZE"]);
  for image in &images {
    table.row(vec![
      image.version.clone(),
      truncate_hash(&image.image_id).to_string(),
      format_timestamp(image.created),
      image.virtual_size.map(format_bytes).unwrap_or_else(|| "-".to_string()),
    ]);
  }
  table.print();
  Ok(())
}
