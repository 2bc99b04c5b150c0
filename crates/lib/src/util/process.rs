//! Running host tools.
//!
//! Every external program (`systemctl`, `systemd-tmpfiles`, `runc`, `rpmbuild`,
//! `dnf`, `docker`) goes through [`run`]: synchronous, output captured, a
//! non-zero exit is an error carrying the exit code and stderr.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("failed to run `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: io::Error,
  },

  #[error("`{command}` failed with exit code {code:?}: {stderr}")]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },
}

impl CommandError {
  /// Exit code of a failed command; `None` if it never ran or was killed.
  pub fn code(&self) -> Option<i32> {
    match self {
      CommandError::Spawn { .. } => None,
      CommandError::Failed { code, .. } => *code,
    }
  }
}

fn render<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
  let mut command = program.to_string();
  for arg in args {
    command.push(' ');
    command.push_str(&arg.as_ref().to_string_lossy());
  }
  command
}

/// Run `program` with `args` and return its trimmed stdout.
pub fn run<S: AsRef<OsStr>>(program: &str, args: &[S], cwd: Option<&Path>) -> Result<String, CommandError> {
  let command_line = render(program, args);
  debug!(command = %command_line, "running command");

  let mut command = Command::new(program);
  command
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
  if let Some(cwd) = cwd {
    command.current_dir(cwd);
  }

  let output = command.output().map_err(|source| CommandError::Spawn {
    command: command_line.clone(),
    source,
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

  if !output.status.success() {
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    return Err(CommandError::Failed {
      command: command_line,
      code: output.status.code(),
      stderr,
    });
  }

  if !stderr.is_empty() {
    debug!(stderr = %stderr, "command stderr");
  }
  Ok(stdout)
}

/// Run a command for its exit status only; spawn failures count as `false`.
pub fn succeeds<S: AsRef<OsStr>>(program: &str, args: &[S]) -> bool {
  run(program, args, None).is_ok()
}
