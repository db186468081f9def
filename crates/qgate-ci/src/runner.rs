//! Single-stage execution and classification.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{QgateError, QgateResult};
use crate::executor::{ExecError, Invocation, ProcessExecutor, ProcessOutput};
use crate::matrix::Configuration;
use crate::stage::{FailureReason, StageOutcome, StageSpec};

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Configuration the stage ran under.
    pub configuration: Configuration,

    /// Command line as executed (empty when skipped).
    pub command: String,

    /// Exit code, if the process ran to completion.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    #[serde(flatten)]
    pub outcome: StageOutcome,
}

impl StageResult {
    /// A stage that never ran.
    pub fn skipped(stage_name: impl Into<String>, configuration: &Configuration) -> Self {
        Self {
            stage_name: stage_name.into(),
            configuration: configuration.clone(),
            command: String::new(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            outcome: StageOutcome::Skipped,
        }
    }

    /// Whether this stage passed.
    pub fn passed(&self) -> bool {
        self.outcome == StageOutcome::Passed
    }

    pub fn failed(&self) -> bool {
        self.outcome.is_failed()
    }

    /// stdout followed by stderr.
    ///
    /// The streams are piped separately, so lines written alternately to
    /// each are not interleaved here. Cargo writes diagnostics to stderr
    /// and a formatter's diff to stdout, so each stream stays readable.
    pub fn output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Last `lines` lines of the combined output.
    pub fn output_tail(&self, lines: usize) -> String {
        let output = self.output();
        let all: Vec<&str> = output.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Stage runner: executes one materialized stage and classifies it.
pub struct StageRunner;

impl StageRunner {
    /// Execute a single stage and return the result.
    ///
    /// Non-zero exits, diffs and timeouts come back as `Failed` data. A
    /// missing executable is the only stage-level condition returned as an
    /// error, since no other stage can succeed either.
    pub async fn execute_stage(
        executor: &dyn ProcessExecutor,
        spec: &StageSpec,
        configuration: &Configuration,
        invocation: &Invocation,
    ) -> QgateResult<StageResult> {
        let start = Instant::now();
        info!(
            configuration = %configuration,
            stage = %spec.name,
            command = %invocation.command_line(),
            "Executing stage"
        );

        let mut result = StageResult {
            stage_name: spec.name.clone(),
            configuration: configuration.clone(),
            command: invocation.command_line(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            outcome: StageOutcome::Skipped,
        };

        match executor.execute(invocation).await {
            Ok(output) => {
                if let Some(program) = missing_cargo_subcommand(invocation, &output) {
                    return Err(QgateError::ToolNotFound {
                        stage: spec.name.clone(),
                        program,
                    });
                }
                result.outcome = if spec.remediation {
                    if output.exit_code != 0 {
                        warn!(
                            configuration = %configuration,
                            stage = %spec.name,
                            exit_code = output.exit_code,
                            "Remediation stage exited non-zero"
                        );
                    }
                    StageOutcome::Passed
                } else {
                    spec.predicate.classify(output.exit_code, &output.stdout)
                };
                result.exit_code = Some(output.exit_code);
                result.stdout = output.stdout;
                result.stderr = output.stderr;
            }
            Err(ExecError::Timeout { limit }) => {
                result.outcome = StageOutcome::Failed(FailureReason::Timeout {
                    secs: limit.as_secs(),
                });
            }
            Err(ExecError::NotFound { program }) => {
                return Err(QgateError::ToolNotFound {
                    stage: spec.name.clone(),
                    program,
                });
            }
            Err(ExecError::Io { program, source }) => {
                return Err(QgateError::Spawn { program, source });
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;

        match &result.outcome {
            StageOutcome::Failed(reason) => warn!(
                configuration = %configuration,
                stage = %spec.name,
                %reason,
                duration_ms = result.duration_ms,
                "Stage failed"
            ),
            _ => info!(
                configuration = %configuration,
                stage = %spec.name,
                duration_ms = result.duration_ms,
                "Stage passed"
            ),
        }

        Ok(result)
    }
}

/// Cargo spawns fine when a subcommand (`cargo-fmt`, `cargo-nextest`) is
/// missing, then reports it as an `error:` line on stderr and exits
/// non-zero. Returns the missing `cargo <subcommand>` in that case.
fn missing_cargo_subcommand(invocation: &Invocation, output: &ProcessOutput) -> Option<String> {
    let is_cargo = Path::new(&invocation.program)
        .file_stem()
        .is_some_and(|stem| stem == "cargo");
    if !is_cargo || output.exit_code == 0 {
        return None;
    }
    const MARKERS: [&str; 2] = ["no such command", "is not installed"];
    let missing = output
        .stderr
        .lines()
        .filter(|line| line.starts_with("error: "))
        .any(|line| MARKERS.iter().any(|marker| line.contains(*marker)));
    if !missing {
        return None;
    }
    let subcommand = invocation.args.first().map(String::as_str).unwrap_or_default();
    Some(format!("{} {}", invocation.program, subcommand).trim_end().to_string())
}
