use anyhow::{Context, Result};

use hostctr_lib::backend::BackendKind;

use crate::output::{print_info, print_success};
use crate::prompts::confirm;

pub fn cmd_image_delete(images: &[String], storage: Option<BackendKind>, force: bool) -> Result<()> {
  if !confirm(&format!("Delete {}?", images.join(", ")), force)? {
    print_info("Nothing deleted");
    return Ok(());
  }

  let ctx = super::load_context()?;
  let backend = super::backend(&ctx, storage);
  for image in images {
    let deleted = backend
      .delete_image(image)
      .with_context(|| format!("Failed to delete {}", image))?;
    print_success(&format!("Deleted {} ({} ref(s))", image, deleted.len()));
  }
  Ok(())
}
