//! Orchestrator configuration.
//!
//! Defaults, overridden by environment variables, overridden by CLI flags:
//!
//! * `QGATE_WORKSPACE` - project root (default `.`).
//! * `QGATE_MAX_PARALLEL` - concurrent configurations, `0` = one per configuration.
//! * `QGATE_STAGE_TIMEOUT_SECS` - timeout applied to every stage, `0` = none.
//! * `QGATE_FAIL_FAST` - stop a configuration at its first failure (default `true`).
//! * `QGATE_CANCEL_ON_FAILURE` - stop sibling configurations after a failure (default `false`).
//! * `QGATE_TEST_TOOL` - `nextest` or `verbose`.
//! * `QGATE_TOOLCHAINS` - comma separated toolchain list, e.g. `stable, beta`.
//! * `QGATE_PASS_ENV` - comma separated names of variables forwarded to every stage.
//! * `CARGO_TERM_COLOR` - forwarded unchanged to every stage (default `always`).

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{QgateError, QgateResult};
use crate::pipeline::PipelineOptions;
use crate::profile::{ProfileOptions, TestTool, COLOR_ENV};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub workspace: PathBuf,
    pub max_parallel: usize,
    pub stage_timeout_secs: Option<u64>,
    pub fail_fast: bool,
    pub cancel_on_failure: bool,
    pub color: String,
    pub test_tool: TestTool,
    /// Empty means "use the profile's default set".
    pub toolchains: Vec<String>,
    /// Variables (with their values at load time) forwarded to every stage.
    pub pass_env: BTreeMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            max_parallel: 0,
            stage_timeout_secs: None,
            fail_fast: true,
            cancel_on_failure: false,
            color: "always".to_string(),
            test_tool: TestTool::default(),
            toolchains: Vec::new(),
            pass_env: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from the process environment.
    pub fn from_env() -> QgateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables.
    pub fn from_lookup<F>(lookup: F) -> QgateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workspace) = lookup("QGATE_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }
        if let Some(value) = lookup("QGATE_MAX_PARALLEL") {
            config.max_parallel = parse_number("QGATE_MAX_PARALLEL", &value)? as usize;
        }
        if let Some(value) = lookup("QGATE_STAGE_TIMEOUT_SECS") {
            config.stage_timeout_secs = Some(parse_number("QGATE_STAGE_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("QGATE_FAIL_FAST") {
            config.fail_fast = parse_bool("QGATE_FAIL_FAST", &value)?;
        }
        if let Some(value) = lookup("QGATE_CANCEL_ON_FAILURE") {
            config.cancel_on_failure = parse_bool("QGATE_CANCEL_ON_FAILURE", &value)?;
        }
        if let Some(value) = lookup("QGATE_TEST_TOOL") {
            config.test_tool = value.parse()?;
        }
        if let Some(color) = lookup(COLOR_ENV).filter(|c| !c.is_empty()) {
            config.color = color;
        }
        config.toolchains = split_list(lookup("QGATE_TOOLCHAINS"));
        config.pass_env = split_list(lookup("QGATE_PASS_ENV"))
            .into_iter()
            .filter_map(|name| lookup(&name).map(|value| (name, value)))
            .collect();

        Ok(config)
    }

    pub fn profile_options(&self) -> ProfileOptions {
        ProfileOptions {
            test_tool: self.test_tool,
            color: self.color.clone(),
            extra_env: self.pass_env.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            workspace: self.workspace.clone(),
            fail_fast: self.fail_fast,
            stage_timeout_secs: self.stage_timeout_secs,
        }
    }
}

/// Split a comma separated list. Spaces are stripped, empty items dropped.
fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.replace(' ', ""))
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number(key: &str, value: &str) -> QgateResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            QgateError::config(format!(
                "{} must be a non-negative integer, got '{}'",
                key, value
            ))
        })
}

fn parse_bool(key: &str, value: &str) -> QgateResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(QgateError::config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> QgateResult<OrchestratorConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OrchestratorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = load(&[]).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(config.fail_fast);
        assert!(!config.cancel_on_failure);
        assert_eq!(config.color, "always");
    }

    #[test]
    fn test_env_overrides() {
        let config = load(&[
            ("QGATE_WORKSPACE", "/src/app"),
            ("QGATE_MAX_PARALLEL", "2"),
            ("QGATE_STAGE_TIMEOUT_SECS", "90"),
            ("QGATE_FAIL_FAST", "false"),
            ("QGATE_CANCEL_ON_FAILURE", "yes"),
            ("QGATE_TEST_TOOL", "verbose"),
            ("CARGO_TERM_COLOR", "never"),
        ])
        .unwrap();
        assert_eq!(config.workspace, PathBuf::from("/src/app"));
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.stage_timeout_secs, Some(90));
        assert!(!config.fail_fast);
        assert!(config.cancel_on_failure);
        assert_eq!(config.test_tool, TestTool::Verbose);
        assert_eq!(config.color, "never");
    }

    #[test]
    fn test_toolchain_list_strips_spaces() {
        let config = load(&[("QGATE_TOOLCHAINS", "stable, beta ,,nightly")]).unwrap();
        assert_eq!(config.toolchains, vec!["stable", "beta", "nightly"]);
    }

    #[test]
    fn test_pass_env_captures_values() {
        let config = load(&[
            ("QGATE_PASS_ENV", "TEST_KIND_EXCLUDE, UNSET_VAR"),
            ("TEST_KIND_EXCLUDE", "unit,integration"),
        ])
        .unwrap();
        assert_eq!(config.pass_env.len(), 1);
        assert_eq!(
            config.profile_options().extra_env.get("TEST_KIND_EXCLUDE").map(String::as_str),
            Some("unit,integration")
        );
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(load(&[("QGATE_MAX_PARALLEL", "many")]).unwrap_err().is_configuration());
        assert!(load(&[("QGATE_FAIL_FAST", "maybe")]).unwrap_err().is_configuration());
        assert!(load(&[("QGATE_TEST_TOOL", "pytest")]).unwrap_err().is_configuration());
    }

    #[test]
    fn test_pipeline_options_mirror_config() {
        let config = load(&[("QGATE_STAGE_TIMEOUT_SECS", "0")]).unwrap();
        let options = config.pipeline_options();
        assert_eq!(options.stage_timeout_secs, Some(0));
        assert!(options.fail_fast);
    }
}
