//! Terminal output for hostctr commands.
//!
//! Status lines go to stdout (errors to stderr), listings are printed as
//! column-aligned tables, and `-o json` prints the serialized value instead.

use std::time::{Duration, UNIX_EPOCH};

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Image ids and commits are shown by their first 12 hex characters.
pub fn truncate_hash(hash: &str) -> &str {
  let hex = hash.strip_prefix("sha256:").unwrap_or(hash);
  hex.get(..12).unwrap_or(hex)
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Elapsed time at millisecond precision, e.g. `1m 5s` or `340ms`.
pub fn format_duration(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(millis).to_string()
}

/// Seconds since the epoch as an RFC 3339 UTC timestamp; `-` when unknown.
pub fn format_timestamp(secs: u64) -> String {
  if secs == 0 {
    return "-".to_string();
  }
  humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(secs)).to_string()
}

pub fn print_success(message: &str) {
  let mark = symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green());
  println!("{} {}", mark, message);
}

pub fn print_info(message: &str) {
  let mark = symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue());
  println!("{} {}", mark, message);
}

pub fn print_error(message: &str) {
  let mark = symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red());
  eprintln!("{} {}", mark, message.if_supports_color(Stream::Stderr, |s| s.red()));
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// A listing whose columns are as wide as their widest cell.
pub struct Table {
  header: Vec<&'static str>,
  rows: Vec<Vec<String>>,
}

impl Table {
  pub fn new(header: &[&'static str]) -> Self {
    Self {
      header: header.to_vec(),
      rows: Vec::new(),
    }
  }

  pub fn row(&mut self, cells: Vec<String>) {
    self.rows.push(cells);
  }

  fn widths(&self) -> Vec<usize> {
    let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
    for row in &self.rows {
      for (width, cell) in widths.iter_mut().zip(row) {
        *width = (*width).max(cell.chars().count());
      }
    }
    widths
  }

  fn render_line(widths: &[usize], cells: &[String]) -> String {
    let last = cells.len().saturating_sub(1);
    cells
      .iter()
      .zip(widths)
      .enumerate()
      .map(|(i, (cell, width))| {
        if i == last {
          cell.clone()
        } else {
          format!("{:<width$}", cell, width = width)
        }
      })
      .collect::<Vec<_>>()
      .join("   ")
  }

  pub fn render(&self) -> String {
    let widths = self.widths();
    let header: Vec<String> = self.header.iter().map(|h| h.to_string()).collect();
    let mut lines = vec![Self::render_line(&widths, &header)];
    lines.extend(self.rows.iter().map(|row| Self::render_line(&widths, row)));
    lines.join("\n")
  }

  pub fn print(&self) {
    let rendered = self.render();
    let mut lines = rendered.lines();
    if let Some(header) = lines.next() {
      println!("{}", header.if_supports_color(Stream::Stdout, |s| s.bold()));
    }
    for line in lines {
      println!("{}", line);
    }
  }
}
