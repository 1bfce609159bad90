//! External tool invocation.
//!
//! Every `kubectl`, `helm`, `kind`, `argocd`, or `docker` call made by a probe or an action
//! goes through [`ToolRunner`]. The production implementation spawns a subprocess with a
//! bounded timeout; tests substitute a scripted runner.

use std::{fmt, process::Stdio, time::Duration};

use async_trait::async_trait;
use stagehand_util::{config::ToolPaths, redact_sensitive};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use crate::lease::{ChildLease, Lease};

/// One command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Logical tool name (`kubectl`); resolved to a binary by the runner.
    pub tool: String,
    pub args: Vec<String>,
    /// Data written to the child's stdin.
    pub stdin: Option<String>,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new<I, S>(tool: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: tool.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Command line with secrets redacted, suitable for logs and reports.
    pub fn display_redacted(&self) -> String {
        redact_sensitive(&self.to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tool)?;
        for argument in &self.args {
            if argument.is_empty() || argument.contains(char::is_whitespace) {
                write!(f, " '{argument}'")?;
            } else {
                write!(f, " {argument}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Trimmed stderr, falling back to stdout, for error messages.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        let text = if stderr.is_empty() { self.stdout.trim() } else { stderr };
        redact_sensitive(text)
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} is not installed or not on PATH")]
    NotInstalled { tool: String },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {after:?}")]
    TimedOut { command: String, after: Duration },
}

/// Seam through which external command-line tools are executed.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run an invocation to completion and capture its output.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;

    /// Start a long-lived process (such as `kubectl port-forward`) owned by the caller.
    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn Lease>, ToolError>;
}

/// Runs tools as subprocesses using the configured binary paths.
#[derive(Debug, Clone)]
pub struct ProcessToolRunner {
    paths: ToolPaths,
    default_timeout: Duration,
}

impl ProcessToolRunner {
    pub fn new(paths: ToolPaths, default_timeout: Duration) -> Self {
        Self { paths, default_timeout }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(self.paths.resolve(&invocation.tool));
        command.args(&invocation.args).kill_on_drop(true);
        command
    }

    fn spawn_error(invocation: &Invocation, source: std::io::Error) -> ToolError {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotInstalled {
                tool: invocation.tool.clone(),
            }
        } else {
            ToolError::Spawn {
                tool: invocation.tool.clone(),
                source,
            }
        }
    }
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        debug!(command = %invocation.display_redacted(), ?timeout, "running tool");

        let mut command = self.command(invocation);
        command
            .stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| Self::spawn_error(invocation, source))?;

        if let Some(input) = &invocation.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|source| Self::spawn_error(invocation, source))?;
        }

        // Dropping the pending future drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::TimedOut {
                command: invocation.display_redacted(),
                after: timeout,
            })?
            .map_err(|source| Self::spawn_error(invocation, source))?;

        let output = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %invocation.tool, status = ?output.status, "tool finished");
        Ok(output)
    }

    async fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn Lease>, ToolError> {
        debug!(command = %invocation.display_redacted(), "starting background tool");
        let mut command = self.command(invocation);
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        let child = command.spawn().map_err(|source| Self::spawn_error(invocation, source))?;
        Ok(Box::new(ChildLease::new(invocation.display_redacted(), child)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces_and_redacts() {
        let invocation = Invocation::new(
            "kubectl",
            ["create", "secret", "generic", "mongodb-secret", "--from-literal=password=hunter2", "a b"],
        );
        let shown = invocation.display_redacted();
        assert!(shown.starts_with("kubectl create secret generic mongodb-secret"));
        assert!(shown.contains("--from-literal=password=<redacted>"));
        assert!(shown.ends_with("'a b'"));
    }

    #[test]
    fn output_message_prefers_stderr() {
        let output = ToolOutput {
            status: Some(1),
            stdout: "partial".into(),
            stderr: "  Error from server (NotFound)\n".into(),
        };
        assert_eq!(output.message(), "Error from server (NotFound)");
        assert_eq!(ToolOutput::failed(1, "").message(), "");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn missing_binary_reports_not_installed() {
        let mut paths = ToolPaths::default();
        paths.kubectl = "stagehand-definitely-missing-binary".into();
        let runner = ProcessToolRunner::new(paths, Duration::from_secs(1));
        let error = runner
            .run(&Invocation::new("kubectl", ["version"]))
            .await
            .expect_err("binary should be missing");
        assert!(matches!(error, ToolError::NotInstalled { ref tool } if tool == "kubectl"));
    }
}
