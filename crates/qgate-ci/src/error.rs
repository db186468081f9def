//! Error types for pipeline orchestration.
//!
//! Stage failures (non-zero exit, diff produced, timeout) are data, carried in
//! [`crate::stage::StageResult`]. Only the variants below abort a whole run.

use thiserror::Error;

/// Hard failures of a quality-gate run.
#[derive(Debug, Error)]
pub enum QgateError {
    /// A stage's executable could not be found. The environment is
    /// misconfigured, so the whole run stops.
    #[error("tool not found for stage '{stage}': {program}")]
    ToolNotFound { stage: String, program: String },

    /// Invalid profile, axis, or stage input. Raised before any process spawns.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The executable exists but the OS refused to start it.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A configuration task panicked or was aborted.
    #[error("configuration task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl QgateError {
    /// Shorthand for [`QgateError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        QgateError::Configuration(msg.into())
    }

    /// Whether this error was raised while validating input.
    pub fn is_configuration(&self) -> bool {
        matches!(self, QgateError::Configuration(_))
    }
}

/// Convenience result alias.
pub type QgateResult<T> = std::result::Result<T, QgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_displays_stage_and_program() {
        let err = QgateError::ToolNotFound {
            stage: "test".to_string(),
            program: "cargo-nextest".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("test"));
        assert!(msg.contains("cargo-nextest"));
    }

    #[test]
    fn test_configuration_error_classified() {
        let err = QgateError::config("unknown profile 'does-not-exist'");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("does-not-exist"));

        let err = QgateError::ToolNotFound {
            stage: "fmt".to_string(),
            program: "cargo".to_string(),
        };
        assert!(!err.is_configuration());
    }
}
