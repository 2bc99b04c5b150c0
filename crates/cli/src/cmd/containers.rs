use anyhow::{Context, Result};

use hostctr_lib::backend::BackendKind;

use crate::output::{OutputFormat, Table, format_timestamp, print_info, print_json, truncate_hash};

pub fn cmd_containers(storage: Option<BackendKind>, output: OutputFormat) -> Result<()> {
  let ctx = super::load_context()?;
  let backend = super::backend(&ctx, storage);
  let containers = backend
    .containers()
    .with_context(|| format!("Failed to list containers from {}", backend.kind()))?;

  if output.is_json() {
    return print_json(&containers);
  }

  if containers.is_empty() {
    print_info("No containers");
    return Ok(());
  }

  let mut table = Table::new(&[
    "CONTAINER", "IMAGE", "IMAGE ID", "CREATED", "STATUS", "RUNTIME", "COMMAND",
  ]);
  for c in &containers {
    table.row(vec![
      c.id.clone(),
      c.image.clone(),
      truncate_hash(&c.image_id).to_string(),
      format_timestamp(c.created),
      c.status.clone(),
      c.runtime.clone(),
      c.command.clone(),
    ]);
  }
  table.print();
  Ok(())
}
