//! Process execution seam.
//!
//! Every stage goes through a [`ProcessExecutor`]. Production code uses
//! [`TokioExecutor`]; tests substitute [`crate::fakes::ScriptedExecutor`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// A fully materialized child-process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Kill the child if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Program and arguments joined by spaces, for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether `needle` is the program or one of the arguments.
    pub fn mentions(&self, needle: &str) -> bool {
        self.program == needle || self.args.iter().any(|a| a == needle)
    }
}

/// Captured result of a finished child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Failures that prevent an exit status from being observed.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("executable not found: {program}")]
    NotFound { program: String },

    #[error("process timed out after {}s", .limit.as_secs())]
    Timeout { limit: Duration },

    #[error("failed to run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs one invocation to completion.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecError>;
}

/// Executor backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl TokioExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for TokioExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecError> {
        debug!(
            command = %invocation.command_line(),
            cwd = %invocation.cwd.display(),
            "Spawning process"
        );

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExecError::NotFound {
                    program: invocation.program.clone(),
                },
                _ => ExecError::Io {
                    program: invocation.program.clone(),
                    source: e,
                },
            })?;

        // Dropping the wait future on timeout kills the child (kill_on_drop).
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecError::Timeout { limit })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ExecError::Io {
            program: invocation.program.clone(),
            source: e,
        })?;

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
