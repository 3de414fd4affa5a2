//! External command execution.
//!
//! Every interaction with the volume manager, the filesystem and the copy
//! pipeline goes through a [`CommandRunner`]. The production runner spawns
//! the process with `tokio::process::Command` and blocks the (single) task
//! until it exits; tests substitute a scripted runner.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BackupError, Result};

/// A program plus its arguments, rendered as a shell-style line for logs
/// and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run `script` through `bash -o pipefail -c` so a failure anywhere in a
    /// pipeline is reported as the exit status.
    pub fn pipeline(script: impl Into<String>) -> Self {
        Self::new("bash").args(["-o", "pipefail", "-c"]).arg(script)
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote `s` for a POSIX shell when it contains anything beyond a safe set.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-=:,@%+".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Executes one external command and returns its combined output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Returns all of stdout followed by all of stderr (the two streams are
    /// captured separately, not interleaved), or
    /// [`BackupError::CommandFailed`] carrying the same output when the
    /// process exits non-zero. No retry.
    async fn run(&self, command: &ShellCommand) -> Result<Vec<u8>>;
}

/// Runs commands on the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &ShellCommand) -> Result<Vec<u8>> {
        debug!(command = %command, "Running command");

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| BackupError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if !output.status.success() {
            return Err(BackupError::CommandFailed {
                command: command.to_string(),
                status: output.status.code(),
                output: String::from_utf8_lossy(&combined).trim().to_string(),
            });
        }

        Ok(combined)
    }
}
