//! Matrix-wide orchestration.
//!
//! Expands the matrix, runs one pipeline per configuration as a tokio task
//! (bounded by a semaphore) and aggregates the verdict from run outcomes only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::{QgateError, QgateResult};
use crate::executor::ProcessExecutor;
use crate::matrix::{Configuration, MatrixAxes};
use crate::pipeline::{CancelSignal, PipelineRunner, RunOutcome, RunReport};
use crate::plan::PipelinePlan;
use crate::profile::PolicyProfile;
use crate::stage::StageSpec;

/// Overall verdict of a matrix run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOutcome {
    Passed,
    Failed,
}

/// Result of a complete matrix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub run_id: Uuid,
    pub profile: PolicyProfile,
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Digest of the executed plan.
    pub plan_digest: String,

    /// One report per configuration, in matrix order.
    pub runs: Vec<RunReport>,

    pub outcome: AggregateOutcome,
}

impl AggregateReport {
    pub fn passed(&self) -> bool {
        self.outcome == AggregateOutcome::Passed
    }

    pub fn run_for(&self, configuration: &Configuration) -> Option<&RunReport> {
        self.runs.iter().find(|r| &r.configuration == configuration)
    }

    /// Runs that did not pass (failed or cancelled).
    pub fn unsuccessful_runs(&self) -> impl Iterator<Item = &RunReport> {
        self.runs.iter().filter(|r| !r.passed())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives the matrix expander and pipeline runner.
pub struct Orchestrator {
    executor: Arc<dyn ProcessExecutor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn ProcessExecutor>, config: OrchestratorConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Toolchain axes from the configured list, or the profile's defaults.
    pub fn default_axes(&self, profile: PolicyProfile) -> MatrixAxes {
        if self.config.toolchains.is_empty() {
            MatrixAxes::toolchains(profile.default_toolchains())
        } else {
            MatrixAxes::toolchains(self.config.toolchains.iter().cloned())
        }
    }

    /// Run `profile_name` across every configuration of `axes`.
    pub async fn execute(
        &self,
        axes: &MatrixAxes,
        profile_name: &str,
    ) -> QgateResult<AggregateReport> {
        let profile: PolicyProfile = profile_name.parse()?;
        let stages = profile.stages(&self.config.profile_options());
        self.execute_stages(profile, axes, stages).await
    }

    /// Run an explicit stage list (e.g. a profile with stages disabled).
    pub async fn execute_stages(
        &self,
        profile: PolicyProfile,
        axes: &MatrixAxes,
        stages: Vec<StageSpec>,
    ) -> QgateResult<AggregateReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let pipeline_options = self.config.pipeline_options();

        // Validates axes and materializes every stage before anything spawns.
        let plan = PipelinePlan::build(profile, axes, &stages, &pipeline_options)?;

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            profile = %profile,
            configurations = plan.configurations.len(),
            plan_digest = %plan.digest,
            "Starting quality gate"
        );

        let limit = match self.config.max_parallel {
            0 => plan.configurations.len(),
            n => n,
        }
        .max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let runner = Arc::new(PipelineRunner::new(self.executor.clone(), pipeline_options));
        let stages = Arc::new(stages);
        let cancel = Arc::new(CancelSignal::new());
        let cancel_on_failure = self.config.cancel_on_failure;

        let handles: Vec<JoinHandle<QgateResult<RunReport>>> = plan
            .configurations
            .iter()
            .cloned()
            .map(|configuration| {
                let semaphore = semaphore.clone();
                let runner = runner.clone();
                let stages = stages.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    // The semaphore is never closed, so acquisition only fails on shutdown.
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = runner
                        .run_with_cancel(&configuration, &stages, &cancel)
                        .await;

                    match &result {
                        Ok(report) if report.outcome == RunOutcome::Failed && cancel_on_failure => {
                            if cancel.request_cancel() {
                                info!(
                                    configuration = %configuration,
                                    "Cancelling sibling configurations"
                                );
                            } else {
                                warn!(
                                    configuration = %configuration,
                                    "Remediation already started; letting siblings finish"
                                );
                            }
                        }
                        Err(e) => {
                            error!(configuration = %configuration, error = %e, "Aborting run");
                            cancel.force_cancel();
                        }
                        _ => {}
                    }
                    result
                })
            })
            .collect();

        let mut runs = Vec::with_capacity(handles.len());
        let mut fatal: Option<QgateError> = None;
        for joined in futures::future::join_all(handles).await {
            match joined? {
                Ok(report) => runs.push(report),
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        let outcome = if runs.iter().all(RunReport::passed) {
            AggregateOutcome::Passed
        } else {
            AggregateOutcome::Failed
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if outcome == AggregateOutcome::Passed {
            info!(run_id = %run_id, duration_ms, "Quality gate passed");
        } else {
            info!(run_id = %run_id, duration_ms, "Quality gate failed");
        }

        Ok(AggregateReport {
            run_id,
            profile,
            started_at,
            duration_ms,
            plan_digest: plan.digest,
            runs,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedExecutor;

    fn orchestrator(
        exec: ScriptedExecutor,
        config: OrchestratorConfig,
    ) -> (Orchestrator, Arc<ScriptedExecutor>) {
        let exec = Arc::new(exec);
        (Orchestrator::new(exec.clone(), config), exec)
    }

    #[tokio::test]
    async fn test_unknown_profile_spawns_nothing() {
        let (orch, exec) = orchestrator(ScriptedExecutor::new(), OrchestratorConfig::default());
        let err = orch
            .execute(&MatrixAxes::toolchains(["stable"]), "does-not-exist")
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(exec.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_empty_axis_values_rejected_before_spawn() {
        let (orch, exec) = orchestrator(ScriptedExecutor::new(), OrchestratorConfig::default());
        let axes = MatrixAxes::new().with_axis("toolchain", Vec::<String>::new());
        let err = orch.execute(&axes, "ci-strict").await.unwrap_err();
        assert!(err.is_configuration());
        assert!(exec.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_default_axes_follow_profile_then_config() {
        let (orch, _) = orchestrator(ScriptedExecutor::new(), OrchestratorConfig::default());
        assert_eq!(
            orch.default_axes(PolicyProfile::CiStrict),
            MatrixAxes::toolchains(["stable", "beta", "nightly"])
        );
        assert!(orch.default_axes(PolicyProfile::LocalFix).is_empty());

        let config = OrchestratorConfig {
            toolchains: vec!["1.75.0".to_string()],
            ..OrchestratorConfig::default()
        };
        let (orch, _) = orchestrator(ScriptedExecutor::new(), config);
        assert_eq!(orch.default_axes(PolicyProfile::LocalFix), MatrixAxes::toolchains(["1.75.0"]));
    }

    #[tokio::test]
    async fn test_local_fix_runs_once_unparameterized() {
        let (orch, exec) = orchestrator(ScriptedExecutor::new(), OrchestratorConfig::default());
        let report = orch.execute(&MatrixAxes::new(), "local-fix").await.unwrap();
        assert!(report.passed());
        assert_eq!(report.runs.len(), 1);
        assert!(report.runs[0].configuration.is_empty());
        assert_eq!(exec.invocations().len(), 5);
        assert!(exec
            .invocations()
            .iter()
            .all(|inv| !inv.env.contains_key("RUSTUP_TOOLCHAIN")));
    }

    #[tokio::test]
    async fn test_tool_not_found_aborts_whole_run() {
        let (orch, _) = orchestrator(
            ScriptedExecutor::new().missing_when(|inv| inv.mentions("nextest")),
            OrchestratorConfig::default(),
        );
        let err = orch
            .execute(&MatrixAxes::toolchains(["stable", "beta"]), "ci-strict")
            .await
            .unwrap_err();
        assert!(matches!(err, QgateError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_report_serializes_to_json() {
        let (orch, _) = orchestrator(ScriptedExecutor::new(), OrchestratorConfig::default());
        let report = orch
            .execute(&MatrixAxes::toolchains(["stable"]), "ci-strict")
            .await
            .unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"profile\": \"ci-strict\""));
        assert!(json.contains("\"outcome\": \"passed\""));
    }
}
