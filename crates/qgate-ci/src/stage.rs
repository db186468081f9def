//! Stage definitions and materialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{QgateError, QgateResult};
use crate::executor::Invocation;
use crate::matrix::{Configuration, TOOLCHAIN_AXIS};

/// Builtin quality-gate stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// cargo fmt --all -- --check
    FmtCheck,

    /// cargo fmt --all
    FmtFix,

    /// cargo clippy --workspace --all-targets -- -D warnings
    Clippy,

    /// cargo build --workspace --all-targets
    Build,

    /// cargo build --workspace --release
    BuildRelease,

    /// cargo doc --workspace --no-deps
    Doc,

    /// cargo test --workspace --doc
    DocTest,

    /// cargo nextest run --workspace
    Nextest,

    /// cargo test --workspace --verbose
    TestVerbose,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::FmtCheck | BuiltinStage::FmtFix => "fmt",
            BuiltinStage::Clippy => "clippy",
            BuiltinStage::Build => "build",
            BuiltinStage::BuildRelease => "build_release",
            BuiltinStage::Doc => "doc",
            BuiltinStage::DocTest => "doctest",
            BuiltinStage::Nextest | BuiltinStage::TestVerbose => "test",
        }
    }

    /// Get the stage's command (first element is the executable).
    pub fn command(&self) -> Vec<String> {
        let args: &[&str] = match self {
            BuiltinStage::FmtCheck => &["cargo", "fmt", "--all", "--", "--check"],
            BuiltinStage::FmtFix => &["cargo", "fmt", "--all"],
            BuiltinStage::Clippy => &[
                "cargo",
                "clippy",
                "--workspace",
                "--all-targets",
                "--",
                "-D",
                "warnings",
            ],
            BuiltinStage::Build => &["cargo", "build", "--workspace", "--all-targets"],
            BuiltinStage::BuildRelease => &["cargo", "build", "--workspace", "--release"],
            BuiltinStage::Doc => &["cargo", "doc", "--workspace", "--no-deps"],
            BuiltinStage::DocTest => &["cargo", "test", "--workspace", "--doc"],
            BuiltinStage::Nextest => &["cargo", "nextest", "run", "--workspace"],
            BuiltinStage::TestVerbose => &["cargo", "test", "--workspace", "--verbose"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }

    /// Default timeout in seconds.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            BuiltinStage::FmtCheck | BuiltinStage::FmtFix => 300,
            BuiltinStage::Clippy | BuiltinStage::Doc => 600,
            _ => 1200,
        }
    }

    /// Whether the stage rewrites files instead of reporting.
    pub fn is_remediation(&self) -> bool {
        matches!(self, BuiltinStage::FmtFix)
    }

    /// Success predicate applied to the stage's output.
    pub fn predicate(&self) -> SuccessPredicate {
        match self {
            BuiltinStage::FmtCheck => SuccessPredicate::ExitZeroNoDiff,
            _ => SuccessPredicate::ExitZero,
        }
    }
}

/// How a finished invocation is judged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPredicate {
    /// Exit code 0.
    ExitZero,

    /// Exit code 0 and nothing printed to stdout (no diff).
    ExitZeroNoDiff,
}

/// Why a stage failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Non-zero exit (or -1 when killed by a signal).
    ExitCode { code: i32 },

    /// Exit 0 but the tool reported changes.
    DiffProduced,

    /// Did not finish within the stage timeout.
    Timeout { secs: u64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitCode { code } => write!(f, "exited with code {}", code),
            FailureReason::DiffProduced => write!(f, "produced a diff"),
            FailureReason::Timeout { secs } => write!(f, "timed out after {}s", secs),
        }
    }
}

/// Classified result of one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    Failed(FailureReason),
    Skipped,
}

impl StageOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

impl SuccessPredicate {
    /// Classify a completed invocation.
    pub fn classify(&self, exit_code: i32, stdout: &str) -> StageOutcome {
        if exit_code != 0 {
            return StageOutcome::Failed(FailureReason::ExitCode { code: exit_code });
        }
        match self {
            SuccessPredicate::ExitZero => StageOutcome::Passed,
            SuccessPredicate::ExitZeroNoDiff if stdout.trim().is_empty() => StageOutcome::Passed,
            SuccessPredicate::ExitZeroNoDiff => StageOutcome::Failed(FailureReason::DiffProduced),
        }
    }
}

/// Declared stage: a command template plus how to judge it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSpec {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable). May contain
    /// `{axis}` placeholders.
    pub command: Vec<String>,

    /// Environment for the child. Values may contain `{axis}` placeholders.
    pub env: BTreeMap<String, String>,

    /// Directory relative to the workspace root.
    pub working_dir: PathBuf,

    pub predicate: SuccessPredicate,

    /// Auto-fix stage: never fails on its own predicate.
    pub remediation: bool,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Whether this stage is enabled.
    pub enabled: bool,
}

impl StageSpec {
    /// Create a stage from a builtin.
    pub fn from_builtin(stage: BuiltinStage) -> Self {
        Self {
            name: stage.name().to_string(),
            command: stage.command(),
            env: default_env(),
            working_dir: PathBuf::from("."),
            predicate: stage.predicate(),
            remediation: stage.is_remediation(),
            timeout_secs: stage.default_timeout_secs(),
            enabled: true,
        }
    }

    /// Create a custom check-only stage.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            env: default_env(),
            working_dir: PathBuf::from("."),
            predicate: SuccessPredicate::ExitZero,
            remediation: false,
            timeout_secs,
            enabled: true,
        }
    }

    /// Mark as an auto-fix stage.
    pub fn remediating(mut self) -> Self {
        self.remediation = true;
        self
    }

    pub fn with_predicate(mut self, predicate: SuccessPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Disable this stage.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Timeout to apply, preferring the caller override. `0` disables.
    pub fn effective_timeout(&self, override_secs: Option<u64>) -> Option<Duration> {
        match override_secs.unwrap_or(self.timeout_secs) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Resolve placeholders against `configuration` into a concrete invocation.
    ///
    /// Env entries referring to an axis the configuration lacks are dropped;
    /// an unresolved placeholder in the command is a configuration error.
    pub fn materialize(
        &self,
        configuration: &Configuration,
        workspace: &Path,
        timeout_override: Option<u64>,
    ) -> QgateResult<Invocation> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            QgateError::config(format!("stage '{}' has empty command", self.name))
        })?;

        let resolve = |template: &str| {
            substitute(template, configuration).map_err(|axis| {
                QgateError::config(format!(
                    "stage '{}' references axis '{}' missing from configuration {}",
                    self.name, axis, configuration
                ))
            })
        };

        let program = resolve(program.as_str())?;
        let args = args
            .iter()
            .map(|arg| resolve(arg.as_str()))
            .collect::<QgateResult<Vec<_>>>()?;

        let env = self
            .env
            .iter()
            .filter_map(|(key, template)| {
                substitute(template, configuration)
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect();

        Ok(Invocation {
            program,
            args,
            cwd: workspace.join(&self.working_dir),
            env,
            timeout: self.effective_timeout(timeout_override),
        })
    }
}

/// Env every stage carries unless overridden: the toolchain selector.
fn default_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        "RUSTUP_TOOLCHAIN".to_string(),
        format!("{{{}}}", TOOLCHAIN_AXIS),
    );
    env
}

/// Replace `{axis}` placeholders. Returns the first unknown axis name on failure.
fn substitute(template: &str, configuration: &Configuration) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_axis_name(&after[..close]) => {
                let axis = &after[..close];
                let value = configuration.get(axis).ok_or_else(|| axis.to_string())?;
                out.push_str(value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_axis_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{MatrixAxes, MatrixExpander};

    fn stable() -> Configuration {
        MatrixExpander::expand(&MatrixAxes::toolchains(["stable"])).remove(0)
    }

    #[test]
    fn test_builtin_stage_names() {
        assert_eq!(BuiltinStage::FmtCheck.name(), "fmt");
        assert_eq!(BuiltinStage::FmtFix.name(), "fmt");
        assert_eq!(BuiltinStage::Clippy.name(), "clippy");
        assert_eq!(BuiltinStage::BuildRelease.name(), "build_release");
        assert_eq!(BuiltinStage::Nextest.name(), "test");
        assert_eq!(BuiltinStage::TestVerbose.name(), "test");
    }

    #[test]
    fn test_builtin_stage_commands() {
        let fmt_cmd = BuiltinStage::FmtCheck.command();
        assert_eq!(fmt_cmd[0], "cargo");
        assert!(fmt_cmd.contains(&"--check".to_string()));

        let fix_cmd = BuiltinStage::FmtFix.command();
        assert!(!fix_cmd.contains(&"--check".to_string()));

        let clippy_cmd = BuiltinStage::Clippy.command();
        assert!(clippy_cmd.ends_with(&["-D".to_string(), "warnings".to_string()]));

        assert!(BuiltinStage::Nextest.command().contains(&"nextest".to_string()));
        assert!(BuiltinStage::TestVerbose.command().contains(&"--verbose".to_string()));
    }

    #[test]
    fn test_only_fmt_fix_is_remediation() {
        assert!(BuiltinStage::FmtFix.is_remediation());
        assert!(!BuiltinStage::FmtCheck.is_remediation());
        assert!(!BuiltinStage::Clippy.is_remediation());
    }

    #[test]
    fn test_predicate_classification() {
        assert_eq!(SuccessPredicate::ExitZero.classify(0, "noise"), StageOutcome::Passed);
        assert_eq!(
            SuccessPredicate::ExitZero.classify(101, ""),
            StageOutcome::Failed(FailureReason::ExitCode { code: 101 })
        );
        assert_eq!(SuccessPredicate::ExitZeroNoDiff.classify(0, "  \n"), StageOutcome::Passed);
        assert_eq!(
            SuccessPredicate::ExitZeroNoDiff.classify(0, "Diff in src/lib.rs"),
            StageOutcome::Failed(FailureReason::DiffProduced)
        );
        assert_eq!(
            SuccessPredicate::ExitZeroNoDiff.classify(1, "Diff in src/lib.rs"),
            StageOutcome::Failed(FailureReason::ExitCode { code: 1 })
        );
    }

    #[test]
    fn test_stage_spec_custom() {
        let spec = StageSpec::custom("my_stage", vec!["echo".into(), "hello".into()], 60);
        assert_eq!(spec.name, "my_stage");
        assert_eq!(spec.timeout_secs, 60);
        assert!(spec.enabled);
        assert!(!spec.remediation);
        assert!(!spec.disabled().enabled);
    }

    #[test]
    fn test_effective_timeout() {
        let spec = StageSpec::custom("s", vec!["true".into()], 60);
        assert_eq!(spec.effective_timeout(None), Some(Duration::from_secs(60)));
        assert_eq!(spec.effective_timeout(Some(5)), Some(Duration::from_secs(5)));
        assert_eq!(spec.effective_timeout(Some(0)), None);
    }

    #[test]
    fn test_materialize_sets_toolchain_env_and_cwd() {
        let spec = StageSpec::from_builtin(BuiltinStage::Build).with_working_dir("crates/app");
        let inv = spec
            .materialize(&stable(), Path::new("/work"), None)
            .expect("materialize failed");
        assert_eq!(inv.program, "cargo");
        assert_eq!(inv.args[0], "build");
        assert_eq!(inv.cwd, PathBuf::from("/work/crates/app"));
        assert_eq!(inv.env.get("RUSTUP_TOOLCHAIN").map(String::as_str), Some("stable"));
        assert_eq!(inv.timeout, Some(Duration::from_secs(1200)));
    }

    #[test]
    fn test_materialize_drops_env_for_missing_axis() {
        let spec = StageSpec::from_builtin(BuiltinStage::Build);
        let inv = spec
            .materialize(&Configuration::empty(), Path::new("."), None)
            .expect("materialize failed");
        assert!(!inv.env.contains_key("RUSTUP_TOOLCHAIN"));
    }

    #[test]
    fn test_materialize_substitutes_args() {
        let spec = StageSpec::custom(
            "pinned",
            vec!["cargo".into(), "+{toolchain}".into(), "check".into()],
            0,
        );
        let inv = spec.materialize(&stable(), Path::new("."), None).unwrap();
        assert_eq!(inv.args, vec!["+stable".to_string(), "check".to_string()]);
        assert_eq!(inv.timeout, None);
    }

    #[test]
    fn test_materialize_rejects_unresolved_arg() {
        let spec = StageSpec::custom("pinned", vec!["cargo".into(), "+{toolchain}".into()], 0);
        let err = spec
            .materialize(&Configuration::empty(), Path::new("."), None)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_materialize_rejects_empty_command() {
        let spec = StageSpec::custom("empty", vec![], 0);
        assert!(spec
            .materialize(&stable(), Path::new("."), None)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_substitute_leaves_non_placeholders() {
        let config = stable();
        assert_eq!(substitute("a{b c}d", &config).unwrap(), "a{b c}d");
        assert_eq!(substitute("{}", &config).unwrap(), "{}");
        assert_eq!(substitute("tail{", &config).unwrap(), "tail{");
        assert_eq!(substitute("{toolchain}-x", &config).unwrap(), "stable-x");
    }
}
