//! Gate evaluation for pass/fail criteria.

use serde::{Deserialize, Serialize};

use crate::orchestrator::AggregateReport;
use crate::pipeline::RunOutcome;
use crate::stage::StageOutcome;

/// Lines of captured output kept per violation.
const OUTPUT_TAIL_LINES: usize = 20;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Gate evaluation rules.
pub struct CiGate;

impl CiGate {
    /// Evaluate an aggregate report.
    ///
    /// Gate rule:
    /// - Every configuration must have outcome `Passed`
    /// - A failed configuration yields one violation naming its first failing
    ///   stage, the reason and the tail of its captured output
    /// - A cancelled configuration yields one violation naming the configuration
    pub fn evaluate(report: &AggregateReport) -> GateVerdict {
        let mut violations = Vec::new();

        for run in &report.runs {
            match run.outcome {
                RunOutcome::Passed => {}
                RunOutcome::Cancelled => {
                    violations.push(format!(
                        "[{}] cancelled after a sibling configuration failed",
                        run.configuration
                    ));
                }
                RunOutcome::Failed => match run.first_failure() {
                    Some(stage) => {
                        let reason = match &stage.outcome {
                            StageOutcome::Failed(reason) => reason.to_string(),
                            _ => "failed".to_string(),
                        };
                        let mut violation = format!(
                            "[{}] stage '{}' {}",
                            run.configuration, stage.stage_name, reason
                        );
                        let tail = stage.output_tail(OUTPUT_TAIL_LINES);
                        if !tail.trim().is_empty() {
                            violation.push('\n');
                            violation.push_str(&tail);
                        }
                        violations.push(violation);
                    }
                    None => violations.push(format!("[{}] failed", run.configuration)),
                },
            }
        }

        let passed = violations.is_empty() && report.passed();
        let message = if passed {
            format!("All {} configuration(s) passed", report.runs.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Configuration, MatrixAxes, MatrixExpander};
    use crate::orchestrator::AggregateOutcome;
    use crate::pipeline::RunReport;
    use crate::profile::PolicyProfile;
    use crate::runner::StageResult;
    use crate::stage::{FailureReason, StageOutcome};
    use chrono::Utc;
    use uuid::Uuid;

    fn config(toolchain: &str) -> Configuration {
        MatrixExpander::expand(&MatrixAxes::toolchains([toolchain])).remove(0)
    }

    fn stage(name: &str, configuration: &Configuration, outcome: StageOutcome) -> StageResult {
        StageResult {
            outcome,
            command: format!("cargo {}", name),
            ..StageResult::skipped(name, configuration)
        }
    }

    fn report(runs: Vec<RunReport>) -> AggregateReport {
        let outcome = if runs.iter().all(RunReport::passed) {
            AggregateOutcome::Passed
        } else {
            AggregateOutcome::Failed
        };
        AggregateReport {
            run_id: Uuid::new_v4(),
            profile: PolicyProfile::CiStrict,
            started_at: Utc::now(),
            duration_ms: 0,
            plan_digest: String::new(),
            runs,
            outcome,
        }
    }

    fn run(
        configuration: Configuration,
        results: Vec<StageResult>,
        outcome: RunOutcome,
    ) -> RunReport {
        RunReport {
            configuration,
            results,
            skipped: Vec::new(),
            outcome,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_empty_report_passes() {
        let verdict = CiGate::evaluate(&report(vec![]));
        assert!(verdict.passed);
    }

    #[test]
    fn test_all_passed() {
        let stable = config("stable");
        let verdict = CiGate::evaluate(&report(vec![run(
            stable.clone(),
            vec![stage("fmt", &stable, StageOutcome::Passed)],
            RunOutcome::Passed,
        )]));
        assert!(verdict.passed);
        assert!(verdict.violations.is_empty());
        assert!(verdict.message.contains("1 configuration"));
    }

    #[test]
    fn test_failed_configuration_names_first_failing_stage() {
        let beta = config("beta");
        let mut clippy = stage(
            "clippy",
            &beta,
            StageOutcome::Failed(FailureReason::ExitCode { code: 101 }),
        );
        clippy.stderr = "error: unused variable `x`".to_string();

        let verdict = CiGate::evaluate(&report(vec![run(
            beta.clone(),
            vec![stage("fmt", &beta, StageOutcome::Passed), clippy],
            RunOutcome::Failed,
        )]));

        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        let violation = &verdict.violations[0];
        assert!(violation.contains("toolchain=beta"));
        assert!(violation.contains("clippy"));
        assert!(violation.contains("101"));
        assert!(violation.contains("unused variable"));
    }

    #[test]
    fn test_cancelled_configuration_is_violation() {
        let nightly = config("nightly");
        let verdict = CiGate::evaluate(&report(vec![run(nightly, vec![], RunOutcome::Cancelled)]));
        assert!(!verdict.passed);
        assert!(verdict.violations[0].contains("cancelled"));
    }

    #[test]
    fn test_timeout_reason_reported() {
        let stable = config("stable");
        let verdict = CiGate::evaluate(&report(vec![run(
            stable.clone(),
            vec![stage(
                "test",
                &stable,
                StageOutcome::Failed(FailureReason::Timeout { secs: 1200 }),
            )],
            RunOutcome::Failed,
        )]));
        assert!(verdict.violations[0].contains("timed out after 1200s"));
    }
}
