//! In-memory process executor (testing only)
//!
//! `ScriptedExecutor` satisfies the [`ProcessExecutor`] contract without
//! spawning anything. Rules are matched in insertion order; unmatched
//! invocations succeed with empty output.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::executor::{ExecError, Invocation, ProcessExecutor, ProcessOutput};

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;

enum Response {
    Exit(ProcessOutput),
    NotFound,
    Timeout,
}

struct Rule {
    matcher: Matcher,
    response: Response,
}

/// Executor that answers from a script and records every invocation.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `exit_code` and `stdout` when `matcher` accepts the invocation.
    pub fn respond_when<F>(mut self, matcher: F, exit_code: i32, stdout: &str) -> Self
    where
        F: Fn(&Invocation) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            response: Response::Exit(ProcessOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        });
        self
    }

    /// Exit with `exit_code` and `stderr` when `matcher` accepts the invocation.
    pub fn respond_stderr_when<F>(mut self, matcher: F, exit_code: i32, stderr: &str) -> Self
    where
        F: Fn(&Invocation) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            response: Response::Exit(ProcessOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        });
        self
    }

    /// Fail with exit code 1 and `stderr` when `matcher` accepts the invocation.
    pub fn fail_when<F>(self, matcher: F, stderr: &str) -> Self
    where
        F: Fn(&Invocation) -> bool + Send + Sync + 'static,
    {
        self.respond_stderr_when(matcher, 1, stderr)
    }

    /// Report the program as missing when `matcher` accepts the invocation.
    pub fn missing_when<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Invocation) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            response: Response::NotFound,
        });
        self
    }

    /// Report a timeout when `matcher` accepts the invocation.
    pub fn timeout_when<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Invocation) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            matcher: Box::new(matcher),
            response: Response::Timeout,
        });
        self
    }

    /// Sleep before answering, so concurrent runs overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every invocation received so far, in arrival order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<ProcessOutput, ExecError> {
        self.calls.lock().unwrap().push(invocation.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let rule = self.rules.iter().find(|r| (r.matcher)(invocation));
        match rule.map(|r| &r.response) {
            None => Ok(ProcessOutput::default()),
            Some(Response::Exit(output)) => Ok(output.clone()),
            Some(Response::NotFound) => Err(ExecError::NotFound {
                program: invocation.program.clone(),
            }),
            Some(Response::Timeout) => Err(ExecError::Timeout {
                limit: invocation.timeout.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn cargo(sub: &str) -> Invocation {
        Invocation {
            program: "cargo".to_string(),
            args: vec![sub.to_string()],
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_unmatched_invocation_succeeds() {
        let exec = ScriptedExecutor::new();
        let out = exec.execute(&cargo("build")).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert_eq!(exec.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let exec = ScriptedExecutor::new()
            .fail_when(|inv| inv.mentions("clippy"), "warning: unused")
            .respond_when(|_| true, 0, "ok");

        let out = exec.execute(&cargo("clippy")).await.unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(out.stderr.contains("unused"));

        let out = exec.execute(&cargo("build")).await.unwrap();
        assert_eq!(out.stdout, "ok");
    }

    #[tokio::test]
    async fn test_respond_stderr_sets_exit_code() {
        let exec =
            ScriptedExecutor::new().respond_stderr_when(|_| true, 101, "error: no such command");
        let out = exec.execute(&cargo("nextest")).await.unwrap();
        assert_eq!(out.exit_code, 101);
        assert!(out.stdout.is_empty());
        assert_eq!(out.stderr, "error: no such command");
    }

    #[tokio::test]
    async fn test_missing_and_timeout_rules() {
        let exec = ScriptedExecutor::new()
            .missing_when(|inv| inv.mentions("nextest"))
            .timeout_when(|inv| inv.mentions("doc"));

        assert!(matches!(
            exec.execute(&cargo("nextest")).await,
            Err(ExecError::NotFound { .. })
        ));
        assert!(matches!(
            exec.execute(&cargo("doc")).await,
            Err(ExecError::Timeout { .. })
        ));
    }
}
