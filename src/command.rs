//! External collaborator invocation.
//!
//! Every conversion step shells out to an opaque program (sniffer, converter,
//! encoder, …). This module is the single place that spawns them, so the
//! global timeout, stderr capture, and exit-status policy are applied
//! uniformly: a non-zero exit or an exceeded timeout is a failure, full stop.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::WorkerError;

/// Captured output of a successful collaborator run.
#[derive(Debug)]
pub struct ToolOutput {
    /// Trimmed stdout of the process.
    pub stdout: String,
}

/// Builder for one external command invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
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

    pub fn arg_path(self, path: impl AsRef<Path>) -> Self {
        let s = path.as_ref().to_string_lossy().into_owned();
        self.arg(s)
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command to completion, bounded by `timeout`.
    ///
    /// The child is spawned with `kill_on_drop`, so hitting the timeout drops
    /// the wait future and the process is killed rather than left running.
    pub async fn run(&self, timeout: Duration) -> Result<ToolOutput, WorkerError> {
        debug!("running: {} {}", self.program, self.args.join(" "));

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                // NotFound gets the dedicated variant: its message tells the
                // operator to install the tool, not to debug a spawn.
                if e.kind() == std::io::ErrorKind::NotFound {
                    WorkerError::ToolMissing {
                        program: self.program.clone(),
                    }
                } else {
                    WorkerError::SpawnFailed {
                        program: self.program.clone(),
                        source: e,
                    }
                }
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(WorkerError::SpawnFailed {
                    program: self.program.clone(),
                    source: e,
                })
            }
            Err(_) => {
                warn!(
                    "'{}' exceeded {}s timeout, killing",
                    self.program,
                    timeout.as_secs()
                );
                return Err(WorkerError::CommandTimeout {
                    program: self.program.clone(),
                    secs: timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            Ok(ToolOutput {
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(WorkerError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr,
            })
        }
    }
}

/// Resolve the collaborator programs on PATH, returning the missing ones.
///
/// Called once at worker startup: a missing tool is reported as one clear
/// warning instead of a spawn error for every item that needs it.
pub fn preflight<'a>(programs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut missing = Vec::new();
    for program in programs {
        // Absolute/relative paths (stub scripts in tests) are checked directly.
        let found = if program.contains('/') {
            Path::new(program).exists()
        } else {
            which::which(program).is_ok()
        };
        if !found {
            warn!("collaborator '{}' not found on PATH", program);
            missing.push(program.to_string());
        }
    }
    missing
}
