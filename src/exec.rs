//! External command execution
//!
//! The engine never spawns processes on its own; it hands a fully resolved
//! command string to a `CommandRunner` and blocks the calling worker until
//! the runner reports completion. `ShellRunner` is the production
//! implementation; `MockRunner` records invocations for tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::FlowError;

/// External collaborator that executes one resolved command to completion.
/// A zero exit status is success; anything else is a fatal round failure.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, node: &str, command: &str) -> Result<(), FlowError>;
}

/// Runs commands through `sh -c`, capturing stderr for error context.
///
/// No timeout by default; `with_timeout` opts in to treating an overlong
/// command as a failed round.
#[derive(Debug, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, node: &str, command: &str) -> Result<(), FlowError> {
        debug!(node, %command, "spawning shell command");

        let invocation = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .map_err(|_| FlowError::CommandFailed {
                    node: node.to_string(),
                    command: command.to_string(),
                    status: -1,
                    stderr: format!("timed out after {}s", limit.as_secs()),
                })?,
            None => invocation.await,
        }
        .map_err(|e| FlowError::CommandSpawn {
            node: node.to_string(),
            command: command.to_string(),
            details: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(FlowError::CommandFailed {
                node: node.to_string(),
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Records every invocation without executing anything.
///
/// Optionally fails the first command containing a trigger substring, to
/// exercise the fail-fast path.
#[derive(Debug, Default)]
pub struct MockRunner {
    invocations: Mutex<Vec<(String, String)>>,
    fail_matching: Option<String>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose resolved string contains `pattern`.
    pub fn failing_on(pattern: impl Into<String>) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            fail_matching: Some(pattern.into()),
        }
    }

    /// All `(node, command)` pairs run so far, in invocation order.
    pub fn invocations(&self) -> Vec<(String, String)> {
        self.invocations.lock().clone()
    }

    /// Resolved command strings, in invocation order.
    pub fn commands(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.invocations.lock().len()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, node: &str, command: &str) -> Result<(), FlowError> {
        self.invocations
            .lock()
            .push((node.to_string(), command.to_string()));

        if let Some(pattern) = &self.fail_matching {
            if command.contains(pattern.as_str()) {
                return Err(FlowError::CommandFailed {
                    node: node.to_string(),
                    command: command.to_string(),
                    status: 1,
                    stderr: "mock failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_runner_succeeds_on_zero_exit() {
        let runner = ShellRunner::new();
        assert!(runner.run("probe", "true").await.is_ok());
    }

    #[tokio::test]
    async fn shell_runner_reports_nonzero_exit_with_stderr() {
        let runner = ShellRunner::new();
        let err = runner
            .run("probe", "echo boom >&2; exit 3")
            .await
            .unwrap_err();
        match err {
            FlowError::CommandFailed {
                node,
                status,
                stderr,
                ..
            } => {
                assert_eq!(node, "probe");
                assert_eq!(status, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected CommandFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shell_runner_timeout_is_a_round_failure() {
        let runner = ShellRunner::with_timeout(Duration::from_millis(50));
        let err = runner.run("probe", "sleep 5").await.unwrap_err();
        assert!(matches!(err, FlowError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn mock_runner_records_in_order() {
        let runner = MockRunner::new();
        runner.run("a", "first").await.unwrap();
        runner.run("b", "second").await.unwrap();

        assert_eq!(runner.count(), 2);
        assert_eq!(runner.commands(), vec!["first", "second"]);
        assert_eq!(runner.invocations()[0].0, "a");
    }

    #[tokio::test]
    async fn mock_runner_fails_on_trigger() {
        let runner = MockRunner::failing_on("tumor_3");
        runner.run("align", "bwa mem normal_1").await.unwrap();
        let err = runner.run("align", "bwa mem tumor_3").await.unwrap_err();
        assert!(matches!(err, FlowError::CommandFailed { .. }));
        // The failing invocation is still recorded.
        assert_eq!(runner.count(), 2);
    }
}
