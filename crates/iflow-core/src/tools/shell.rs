use async_trait::async_trait;
use iflow_execution::{CodeExecutor, ExecutionError};
use std::time::Duration;
use tracing::debug;

use super::{ExecutionResult, ToolHandler};
use crate::permission::Confirmer;

/// `@cmd(command)`: run a shell command and hand back what it printed.
///
/// A nonzero exit is still a successful call; the model gets the output and
/// the exit code and decides what to do with them.
pub struct ShellTool {
    executor: CodeExecutor,
}

impl ShellTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            executor: CodeExecutor::new().with_timeout(timeout),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self {
            executor: CodeExecutor::new(),
        }
    }
}

#[async_trait]
impl ToolHandler for ShellTool {
    async fn execute(
        &self,
        args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        match self.executor.execute(args).await {
            Ok(output) => {
                let mut message = output.combined_output();
                if !output.success {
                    debug!("Command exited with {:?}", output.exit_code);
                    if !message.is_empty() && !message.ends_with('\n') {
                        message.push('\n');
                    }
                    match output.exit_code {
                        Some(code) => message.push_str(&format!("(exit code {})", code)),
                        None => message.push_str("(terminated by signal)"),
                    }
                }
                Ok(ExecutionResult::ok(message))
            }
            Err(ExecutionError::EmptyCommand) => {
                Ok(ExecutionResult::failure("usage: @cmd(<command>)"))
            }
            Err(e) => Ok(ExecutionResult::failure(e.to_string())),
        }
    }

    fn description(&self) -> &str {
        "Run a shell command and return its output"
    }
}
