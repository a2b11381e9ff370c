//! Runs shell commands on behalf of the `cmd` tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("empty command")]
    EmptyCommand,
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandResult {
    /// Stdout followed by stderr, the form handed back to the model.
    pub fn combined_output(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str("stderr: ");
            output.push_str(&self.stderr);
        }
        output
    }
}

#[derive(Debug, Clone)]
pub struct CodeExecutor {
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl Default for CodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeExecutor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` through the platform shell and wait for it, up to the
    /// configured timeout. The child is killed if the timeout fires.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, ExecutionError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }

        debug!("Executing shell command: {}", command);

        let mut child = shell_command(command);
        child
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            child.current_dir(dir);
        }

        let output = match tokio::time::timeout(self.timeout, child.output()).await {
            Ok(result) => result.map_err(|source| ExecutionError::Spawn {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                warn!("Command `{}` timed out after {:?}", command, self.timeout);
                return Err(ExecutionError::Timeout(self.timeout));
            }
        };

        let result = CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        debug!(
            "Command finished: exit_code={:?}, stdout={} bytes, stderr={} bytes",
            result.exit_code,
            result.stdout.len(),
            result.stderr.len()
        );

        Ok(result)
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}
