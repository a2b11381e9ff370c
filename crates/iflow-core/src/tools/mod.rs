//! Tool handlers and the registry that dispatches `@name(args)` calls.

pub mod builtin;
pub mod shell;

pub use builtin::{RequestControlTool, WaitTool};
pub use shell::ShellTool;

use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::permission::Confirmer;

/// Owner id of the built-in tools.
pub const CORE_OWNER: &str = "core";

/// What a tool reports back to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with the raw text between the parentheses. Handlers that
    /// need a further yes/no from the operator ask `confirmer`.
    async fn execute(
        &self,
        args: &str,
        confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult>;

    fn description(&self) -> &str {
        ""
    }
}

struct Entry {
    owner: String,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. An existing entry with the same name is
    /// replaced: the last registration answers.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
        owner: impl Into<String>,
    ) {
        let name = name.into();
        let owner = owner.into();
        if let Some(previous) = self.entries.get(&name) {
            debug!(
                "Tool '{}' from '{}' replaced by '{}'",
                name, previous.owner, owner
            );
        }
        self.entries.insert(name, Entry { owner, handler });
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries.get(name).map(|entry| entry.handler.clone())
    }

    pub fn owner(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.owner.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run a tool by name. Never fails: unknown names, handler errors and
    /// handler panics all come back as an unsuccessful result.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &str,
        confirmer: &dyn Confirmer,
    ) -> ExecutionResult {
        let Some(handler) = self.resolve(name) else {
            warn!("Unknown tool requested: {}", name);
            return ExecutionResult::failure(format!("unknown tool: {}", name));
        };

        debug!("Dispatching tool {}({})", name, args);
        let outcome = AssertUnwindSafe(handler.execute(args, confirmer))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Tool {} failed: {:#}", name, e);
                ExecutionResult::failure(format!("{:#}", e))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Tool {} panicked: {}", name, message);
                ExecutionResult::failure(format!("tool panicked: {}", message))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
