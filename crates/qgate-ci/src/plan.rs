//! Pipeline plan and identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{QgateError, QgateResult};
use crate::executor::Invocation;
use crate::matrix::{Configuration, MatrixAxes, MatrixExpander};
use crate::pipeline::PipelineOptions;
use crate::profile::PolicyProfile;
use crate::stage::StageSpec;

/// One stage of one configuration, fully materialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedStage {
    pub configuration: Configuration,
    pub stage: String,
    pub invocation: Invocation,
}

/// Everything a run will execute, resolved up front.
///
/// Building a plan validates all input, so configuration errors surface
/// before any process is spawned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelinePlan {
    pub profile: PolicyProfile,

    /// Enabled stage names in declared order.
    pub stages: Vec<String>,

    pub configurations: Vec<Configuration>,

    pub entries: Vec<PlannedStage>,

    /// SHA-256 over profile, stages, configurations and commands (deterministic).
    pub digest: String,
}

impl PipelinePlan {
    pub fn build(
        profile: PolicyProfile,
        axes: &MatrixAxes,
        stages: &[StageSpec],
        options: &PipelineOptions,
    ) -> QgateResult<Self> {
        axes.validate()?;

        let enabled: Vec<&StageSpec> = stages.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return Err(QgateError::config(format!(
                "profile '{}' has no enabled stages",
                profile
            )));
        }

        let configurations = MatrixExpander::expand(axes);
        let mut entries = Vec::with_capacity(configurations.len() * enabled.len());
        for configuration in &configurations {
            for spec in &enabled {
                let invocation = spec.materialize(
                    configuration,
                    &options.workspace,
                    options.stage_timeout_secs,
                )?;
                entries.push(PlannedStage {
                    configuration: configuration.clone(),
                    stage: spec.name.clone(),
                    invocation,
                });
            }
        }

        let stages: Vec<String> = enabled.iter().map(|s| s.name.clone()).collect();
        let digest = compute_plan_digest(profile, &stages, &entries);

        Ok(Self {
            profile,
            stages,
            configurations,
            entries,
            digest,
        })
    }

    /// Planned stages for one configuration, in declared order.
    pub fn entries_for<'a>(
        &'a self,
        configuration: &'a Configuration,
    ) -> impl Iterator<Item = &'a PlannedStage> + 'a {
        self.entries
            .iter()
            .filter(move |e| &e.configuration == configuration)
    }
}

/// Compute deterministic digest of the plan.
fn compute_plan_digest(
    profile: PolicyProfile,
    stages: &[String],
    entries: &[PlannedStage],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(profile.name().as_bytes());
    hasher.update(b"\0");
    for stage in stages {
        hasher.update(stage.as_bytes());
        hasher.update(b"\0");
    }
    for entry in entries {
        hasher.update(entry.configuration.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.invocation.command_line().as_bytes());
        hasher.update(b"\0");
        for (key, value) in &entry.invocation.env {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
    }
    hex::encode(hasher.finalize())
}
