//! Per-configuration pipeline execution.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

use crate::error::QgateResult;
use crate::executor::ProcessExecutor;
use crate::matrix::Configuration;
use crate::runner::{StageResult, StageRunner};
use crate::stage::StageSpec;

/// Final state of one configuration's run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
    /// Stopped between stages because a sibling configuration failed.
    Cancelled,
}

/// Result of running every stage for one configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    pub configuration: Configuration,

    /// Executed stages, in declared order. Under fail-fast a failed stage is last.
    pub results: Vec<StageResult>,

    /// Stages that never ran, in declared order.
    pub skipped: Vec<StageResult>,

    pub outcome: RunOutcome,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }

    /// First failed stage, if any.
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.failed())
    }

    /// Executed then skipped stages: the full declared order.
    pub fn all_results(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().chain(self.skipped.iter())
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|s| s.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|s| s.failed()).count()
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: bool,
    remediation_started: bool,
}

/// Cooperative cancellation shared by sibling configurations.
///
/// Checked between stages only, so a running child is never interrupted.
/// Once a remediation stage has started, ordinary cancel requests are refused.
#[derive(Debug, Default)]
pub struct CancelSignal {
    state: Mutex<CancelState>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask siblings to stop. Returns `false` if refused because a
    /// remediation stage has already started.
    pub fn request_cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.remediation_started {
            return false;
        }
        state.cancelled = true;
        true
    }

    /// Stop starting new stages regardless of remediation (fatal errors).
    pub fn force_cancel(&self) {
        self.state.lock().unwrap().cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().unwrap().cancelled
    }

    /// Record that a remediation stage is about to start. Returns `false`
    /// if the run was already cancelled and the stage must not start.
    pub fn begin_remediation(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.cancelled {
            return false;
        }
        state.remediation_started = true;
        true
    }

    pub fn remediation_started(&self) -> bool {
        self.state.lock().unwrap().remediation_started
    }
}

/// Knobs for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Project root; stage working dirs are relative to it.
    pub workspace: PathBuf,

    /// Abort remaining stages after the first failure.
    pub fail_fast: bool,

    /// Overrides every stage's own timeout when set (0 = none).
    pub stage_timeout_secs: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            fail_fast: true,
            stage_timeout_secs: None,
        }
    }
}

/// Runs declared stages for one configuration, strictly in order.
pub struct PipelineRunner {
    executor: Arc<dyn ProcessExecutor>,
    options: PipelineOptions,
}

impl PipelineRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>, options: PipelineOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Execute `stages` for `configuration`.
    ///
    /// Stage failures are captured in the report. Only a missing tool, a
    /// spawn failure or a materialization error is returned as `Err`.
    pub async fn run(
        &self,
        configuration: &Configuration,
        stages: &[StageSpec],
    ) -> QgateResult<RunReport> {
        self.run_with_cancel(configuration, stages, &CancelSignal::new())
            .await
    }

    /// Like [`PipelineRunner::run`], observing `cancel` between stages.
    pub async fn run_with_cancel(
        &self,
        configuration: &Configuration,
        stages: &[StageSpec],
        cancel: &CancelSignal,
    ) -> QgateResult<RunReport> {
        let start = Instant::now();
        info!(configuration = %configuration, "Starting pipeline");

        let stages: Vec<&StageSpec> = stages
            .iter()
            .filter(|s| {
                if !s.enabled {
                    info!(stage = %s.name, "Skipping disabled stage");
                }
                s.enabled
            })
            .collect();

        let mut results = Vec::new();
        let mut skipped = Vec::new();
        let mut outcome = RunOutcome::Passed;

        for (idx, spec) in stages.iter().enumerate() {
            let cancelled =
                cancel.is_cancelled() || (spec.remediation && !cancel.begin_remediation());
            let stop = if cancelled {
                info!(configuration = %configuration, stage = %spec.name, "Run cancelled");
                if outcome == RunOutcome::Passed {
                    outcome = RunOutcome::Cancelled;
                }
                true
            } else {
                let invocation = spec.materialize(
                    configuration,
                    &self.options.workspace,
                    self.options.stage_timeout_secs,
                )?;
                let result = StageRunner::execute_stage(
                    self.executor.as_ref(),
                    spec,
                    configuration,
                    &invocation,
                )
                .await?;
                let failed = result.failed();
                results.push(result);
                if failed {
                    outcome = RunOutcome::Failed;
                }
                failed && self.options.fail_fast
            };

            if stop {
                let from = if cancelled { idx } else { idx + 1 };
                skipped.extend(
                    stages[from..]
                        .iter()
                        .map(|s| StageResult::skipped(&s.name, configuration)),
                );
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            configuration = %configuration,
            outcome = ?outcome,
            duration_ms,
            "Pipeline finished"
        );

        Ok(RunReport {
            configuration: configuration.clone(),
            results,
            skipped,
            outcome,
            duration_ms,
        })
    }
}
