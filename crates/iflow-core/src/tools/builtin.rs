use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{ExecutionResult, ToolHandler};
use crate::permission::{Confirmer, PermissionGate};

/// `@request_control()`: elevate the permission gate.
///
/// The call itself is confirmed like any other directive, so reaching
/// `execute` means the operator agreed.
pub struct RequestControlTool {
    gate: Arc<PermissionGate>,
}

impl RequestControlTool {
    pub fn new(gate: Arc<PermissionGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl ToolHandler for RequestControlTool {
    async fn execute(
        &self,
        _args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        if self.gate.is_elevated() {
            return Ok(ExecutionResult::ok("control was already granted"));
        }
        self.gate.elevate();
        Ok(ExecutionResult::ok(
            "control granted: tools and commands now run without confirmation",
        ))
    }

    fn description(&self) -> &str {
        "Ask the operator to allow every further directive without confirmation"
    }
}

/// `@wait(seconds)`: pause before the next step, e.g. while something starts up.
pub struct WaitTool;

#[async_trait]
impl ToolHandler for WaitTool {
    async fn execute(
        &self,
        args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        let Ok(seconds) = args.trim().parse::<f64>() else {
            return Ok(ExecutionResult::failure(
                "invalid argument, expected a number of seconds",
            ));
        };
        if seconds <= 0.0 {
            return Ok(ExecutionResult::failure("wait time must be greater than 0"));
        }
        let Ok(duration) = Duration::try_from_secs_f64(seconds) else {
            return Ok(ExecutionResult::failure("wait time is out of range"));
        };

        info!("Waiting {:?} at the model's request", duration);
        tokio::time::sleep(duration).await;
        Ok(ExecutionResult::ok(format!("waited {} seconds", seconds)))
    }

    fn description(&self) -> &str {
        "Wait the given number of seconds"
    }
}
