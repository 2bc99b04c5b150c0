use std::time::Instant;

use anyhow::{Context, Result};

use hostctr_lib::deploy::Engine;

use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_stat, print_success};

pub fn cmd_prune(output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let ctx = super::load_context()?;

  let stats = Engine::new(&ctx).prune().context("Prune failed")?;

  if output.is_json() {
    print_json(&stats)?;
  } else {
    println!();
    print_success("Prune complete!");
    print_stat("Checkouts removed", &stats.checkouts_deleted.to_string());
    print_stat("Image refs removed", &stats.store.refs_deleted.to_string());
    print_stat("Objects removed", &stats.store.objects_deleted.to_string());
    print_stat("Space freed", &format_bytes(stats.total_bytes_freed()));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
