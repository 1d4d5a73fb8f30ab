//! Subprocess execution for the shell filter and transform.
//!
//! The child gets its input on stdin and must finish within the
//! configured timeout; otherwise it is killed and a `TimeoutError` is
//! returned.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProcessError, Result, TimeoutError};

/// Maximum captured output per stream before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

fn default_timeout_ms() -> u64 {
    5_000
}

/// Program to run, as declared in service options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ProcessSpec {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `-1` when killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run `spec`, writing `input` to its stdin.
pub async fn run(spec: &ProcessSpec, input: &[u8]) -> Result<ProcessOutput> {
    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| ProcessError {
        command: spec.command.clone(),
        reason: format!("failed to spawn: {e}"),
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        let input = input.to_vec();
        tokio::spawn(async move {
            // The child may exit without reading; a broken pipe is fine.
            let _ = stdin.write_all(&input).await;
        });
    }

    let timeout = spec.timeout();
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ProcessError {
                command: spec.command.clone(),
                reason: e.to_string(),
            }
            .into());
        }
        Err(_) => {
            return Err(TimeoutError {
                operation: format!("process {}", spec.command),
                timeout,
            }
            .into());
        }
    };

    let result = ProcessOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: truncate_output(&output.stdout),
        stderr: truncate_output(&output.stderr),
    };
    debug!(
        command = %spec.command,
        status = result.status,
        stdout_len = result.stdout.len(),
        "Process finished"
    );
    Ok(result)
}

fn truncate_output(bytes: &[u8]) -> String {
    let end = bytes.len().min(MAX_OUTPUT_SIZE);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
