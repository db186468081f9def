//! Policy profiles: the single source of truth for stage order and strictness.
//!
//! - `ci-strict`: read-only format check, warnings denied everywhere, docs and
//!   doc-tests included. Runs on stable, beta and nightly by default.
//! - `local-fix`: formatter rewrites files in place, adds a release build,
//!   no docs. Runs once on the active toolchain by default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{QgateError, QgateResult};
use crate::stage::{BuiltinStage, StageSpec};

/// Variable controlling cargo's colored output.
pub const COLOR_ENV: &str = "CARGO_TERM_COLOR";

/// Which test runner the `test` stage uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestTool {
    /// cargo nextest run
    #[default]
    Nextest,
    /// cargo test --verbose
    Verbose,
}

impl TestTool {
    fn stage(&self) -> BuiltinStage {
        match self {
            TestTool::Nextest => BuiltinStage::Nextest,
            TestTool::Verbose => BuiltinStage::TestVerbose,
        }
    }
}

impl FromStr for TestTool {
    type Err = QgateError;

    fn from_str(s: &str) -> QgateResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nextest" => Ok(TestTool::Nextest),
            "verbose" | "cargo-test" => Ok(TestTool::Verbose),
            other => Err(QgateError::config(format!("unknown test tool '{}'", other))),
        }
    }
}

/// Settings that shape the generated stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileOptions {
    pub test_tool: TestTool,

    /// Value for `CARGO_TERM_COLOR` in every stage.
    pub color: String,

    /// Extra variables forwarded unchanged to every stage.
    pub extra_env: BTreeMap<String, String>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            test_tool: TestTool::default(),
            color: "always".to_string(),
            extra_env: BTreeMap::new(),
        }
    }
}

/// Named bundle of stages and strictness rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyProfile {
    CiStrict,
    LocalFix,
}

impl PolicyProfile {
    pub const ALL: [PolicyProfile; 2] = [PolicyProfile::CiStrict, PolicyProfile::LocalFix];

    pub fn name(&self) -> &'static str {
        match self {
            PolicyProfile::CiStrict => "ci-strict",
            PolicyProfile::LocalFix => "local-fix",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PolicyProfile::CiStrict => "read-only checks, warnings are errors, docs and doc-tests",
            PolicyProfile::LocalFix => "auto-format in place, debug and release builds, tests",
        }
    }

    /// Toolchains used when the caller selects none.
    pub fn default_toolchains(&self) -> Vec<String> {
        match self {
            PolicyProfile::CiStrict => ["stable", "beta", "nightly"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            PolicyProfile::LocalFix => Vec::new(),
        }
    }

    /// Whether the profile sets compiler-wide "deny warnings" flags.
    pub fn denies_warnings(&self) -> bool {
        matches!(self, PolicyProfile::CiStrict)
    }

    fn builtin_stages(&self, test_tool: TestTool) -> Vec<BuiltinStage> {
        match self {
            PolicyProfile::CiStrict => vec![
                BuiltinStage::FmtCheck,
                BuiltinStage::Clippy,
                BuiltinStage::Build,
                BuiltinStage::Doc,
                BuiltinStage::DocTest,
                test_tool.stage(),
            ],
            PolicyProfile::LocalFix => vec![
                BuiltinStage::FmtFix,
                BuiltinStage::Clippy,
                BuiltinStage::Build,
                BuiltinStage::BuildRelease,
                test_tool.stage(),
            ],
        }
    }

    /// Ordered stages for this profile.
    pub fn stages(&self, options: &ProfileOptions) -> Vec<StageSpec> {
        self.builtin_stages(options.test_tool)
            .into_iter()
            .map(|builtin| {
                let mut spec = StageSpec::from_builtin(builtin);
                spec.env.extend(options.extra_env.clone());
                spec.env.insert(COLOR_ENV.to_string(), options.color.clone());
                if self.denies_warnings() {
                    spec.env.insert("RUSTFLAGS".to_string(), "-D warnings".to_string());
                    spec.env.insert("RUSTDOCFLAGS".to_string(), "-D warnings".to_string());
                }
                spec
            })
            .collect()
    }
}

impl fmt::Display for PolicyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyProfile {
    type Err = QgateError;

    fn from_str(s: &str) -> QgateResult<Self> {
        PolicyProfile::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                QgateError::config(format!(
                    "unknown profile '{}' (expected one of: ci-strict, local-fix)",
                    s
                ))
            })
    }
}

/// Ordered stages for `profile_name` with default options.
pub fn stages_for(profile_name: &str) -> QgateResult<Vec<StageSpec>> {
    stages_for_with(profile_name, &ProfileOptions::default())
}

/// Ordered stages for `profile_name`.
pub fn stages_for_with(
    profile_name: &str,
    options: &ProfileOptions,
) -> QgateResult<Vec<StageSpec>> {
    Ok(profile_name.parse::<PolicyProfile>()?.stages(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::SuccessPredicate;

    fn names(stages: &[StageSpec]) -> Vec<&str> {
        stages.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_ci_strict_stage_order() {
        let stages = stages_for("ci-strict").unwrap();
        assert_eq!(
            names(&stages),
            vec!["fmt", "clippy", "build", "doc", "doctest", "test"]
        );
    }

    #[test]
    fn test_ci_strict_is_read_only_and_denies_warnings() {
        let stages = stages_for("ci-strict").unwrap();
        assert!(stages.iter().all(|s| !s.remediation));
        assert_eq!(stages[0].predicate, SuccessPredicate::ExitZeroNoDiff);
        assert!(stages[0].command.contains(&"--check".to_string()));
        for stage in &stages {
            assert_eq!(stage.env.get("RUSTFLAGS").map(String::as_str), Some("-D warnings"));
            assert_eq!(stage.env.get(COLOR_ENV).map(String::as_str), Some("always"));
        }
        assert!(stages[5].command.contains(&"nextest".to_string()));
    }

    #[test]
    fn test_local_fix_stage_order() {
        let stages = stages_for("local-fix").unwrap();
        assert_eq!(
            names(&stages),
            vec!["fmt", "clippy", "build", "build_release", "test"]
        );
        assert!(stages[0].remediation);
        assert!(!stages[0].command.contains(&"--check".to_string()));
        assert!(stages[3].command.contains(&"--release".to_string()));
        assert!(stages.iter().all(|s| !s.env.contains_key("RUSTFLAGS")));
        assert!(stages[1].command.ends_with(&["-D".to_string(), "warnings".to_string()]));
    }

    #[test]
    fn test_test_tool_is_configurable() {
        let options = ProfileOptions {
            test_tool: TestTool::Verbose,
            ..ProfileOptions::default()
        };
        let stages = stages_for_with("local-fix", &options).unwrap();
        let test = stages.last().unwrap();
        assert_eq!(test.name, "test");
        assert!(test.command.contains(&"--verbose".to_string()));
    }

    #[test]
    fn test_options_propagate_to_every_stage() {
        let mut extra_env = BTreeMap::new();
        extra_env.insert("TEST_KIND_EXCLUDE".to_string(), "integration".to_string());
        let options = ProfileOptions {
            color: "never".to_string(),
            extra_env,
            ..ProfileOptions::default()
        };
        for stage in PolicyProfile::LocalFix.stages(&options) {
            assert_eq!(stage.env.get(COLOR_ENV).map(String::as_str), Some("never"));
            assert_eq!(
                stage.env.get("TEST_KIND_EXCLUDE").map(String::as_str),
                Some("integration")
            );
        }
    }

    #[test]
    fn test_unknown_profile_is_configuration_error() {
        let err = stages_for("does-not-exist").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn test_profile_round_trips_through_name() {
        for profile in PolicyProfile::ALL {
            assert_eq!(profile.name().parse::<PolicyProfile>().unwrap(), profile);
        }
        assert_eq!(PolicyProfile::CiStrict.default_toolchains().len(), 3);
        assert!(PolicyProfile::LocalFix.default_toolchains().is_empty());
    }

    #[test]
    fn test_test_tool_parse() {
        assert_eq!("nextest".parse::<TestTool>().unwrap(), TestTool::Nextest);
        assert_eq!("Verbose".parse::<TestTool>().unwrap(), TestTool::Verbose);
        assert!("pytest".parse::<TestTool>().is_err());
    }
}
