//! Human-readable report rendering.

use crate::gate::GateVerdict;
use crate::orchestrator::AggregateReport;
use crate::pipeline::RunOutcome;
use crate::runner::StageResult;
use crate::stage::StageOutcome;

fn stage_mark(result: &StageResult) -> &'static str {
    match result.outcome {
        StageOutcome::Passed => "✓",
        StageOutcome::Failed(_) => "✗",
        StageOutcome::Skipped => "-",
    }
}

fn run_mark(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Passed => "✓ PASSED",
        RunOutcome::Failed => "✗ FAILED",
        RunOutcome::Cancelled => "- CANCELLED",
    }
}

/// Terminal output: one block per configuration, then the gate verdict.
pub fn render_text(report: &AggregateReport, verdict: &GateVerdict) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run ID: {}\n", report.run_id));
    out.push_str(&format!("Profile: {}\n", report.profile));
    out.push_str(&format!("Plan: {}\n", &report.plan_digest[..12.min(report.plan_digest.len())]));
    out.push_str(&format!("Duration: {}ms\n\n", report.duration_ms));

    for run in &report.runs {
        out.push_str(&format!(
            "[{}] {} ({}ms)\n",
            run.configuration,
            run_mark(run.outcome),
            run.duration_ms
        ));
        for result in run.all_results() {
            match (&result.outcome, result.exit_code) {
                (StageOutcome::Skipped, _) => {
                    out.push_str(&format!(
                        "  {} {} (skipped)\n",
                        stage_mark(result),
                        result.stage_name
                    ));
                }
                (StageOutcome::Failed(reason), _) => {
                    out.push_str(&format!(
                        "  {} {} ({}ms, {})\n",
                        stage_mark(result),
                        result.stage_name,
                        result.duration_ms,
                        reason
                    ));
                }
                (StageOutcome::Passed, code) => {
                    out.push_str(&format!(
                        "  {} {} ({}ms, exit code: {})\n",
                        stage_mark(result),
                        result.stage_name,
                        result.duration_ms,
                        code.unwrap_or(0)
                    ));
                }
            }
        }
        out.push_str(&format!(
            "  Summary: {}/{} stages passed\n\n",
            run.passed_count(),
            run.all_results().count()
        ));
    }

    out.push_str(&format!(
        "Gate: {}\n",
        if verdict.passed { "✓ PASSED" } else { "✗ FAILED" }
    ));
    if !verdict.violations.is_empty() {
        out.push_str("Violations:\n");
        for violation in &verdict.violations {
            for (i, line) in violation.lines().enumerate() {
                let prefix = if i == 0 { "  - " } else { "    " };
                out.push_str(prefix);
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

/// Markdown summary suitable for a CI job summary or PR comment.
pub fn render_markdown(report: &AggregateReport, verdict: &GateVerdict) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Quality Gate: {}\n\n",
        if verdict.passed { "passed" } else { "failed" }
    ));
    out.push_str(&format!(
        "- profile: `{}`\n- configurations: {}\n- duration: {}ms\n- plan: `{}`\n\n",
        report.profile,
        report.runs.len(),
        report.duration_ms,
        report.plan_digest
    ));

    let stage_names: Vec<&str> = report
        .runs
        .first()
        .map(|run| run.all_results().map(|r| r.stage_name.as_str()).collect())
        .unwrap_or_default();

    out.push_str("| configuration |");
    for name in &stage_names {
        out.push_str(&format!(" {} |", name));
    }
    out.push_str("\n|---|");
    for _ in &stage_names {
        out.push_str("---|");
    }
    out.push('\n');

    for run in &report.runs {
        out.push_str(&format!("| `{}` |", run.configuration));
        for result in run.all_results() {
            out.push_str(&format!(" {} |", stage_mark(result)));
        }
        out.push('\n');
    }

    if !verdict.violations.is_empty() {
        out.push_str("\n## Violations\n");
        for violation in &verdict.violations {
            let mut lines = violation.lines();
            if let Some(head) = lines.next() {
                out.push_str(&format!("\n- {}\n", head));
            }
            let body: Vec<&str> = lines.collect();
            if !body.is_empty() {
                out.push_str("\n```text\n");
                out.push_str(&body.join("\n"));
                out.push_str("\n```\n");
            }
        }
    }
    out
}
