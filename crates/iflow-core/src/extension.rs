//! Extensions contribute tools and a block of prompt text.
//!
//! Extensions are registered explicitly at start-up through an
//! [`ExtensionSet`]; the set loads each one, seeds the tool registry in
//! registration order and builds the prompt text appended to the system
//! message.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::tools::{ToolHandler, ToolRegistry};

pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn author(&self) -> &str {
        "unknown"
    }

    /// Instructions appended to the system message. Empty means none.
    fn prompt_text(&self) -> String {
        String::new()
    }

    fn tools(&self) -> BTreeMap<String, Arc<dyn ToolHandler>>;

    /// One line per tool; defaults to each handler's own description.
    fn tool_descriptions(&self) -> BTreeMap<String, String> {
        self.tools()
            .into_iter()
            .map(|(name, handler)| (name, handler.description().to_string()))
            .collect()
    }

    fn on_load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unload(&self) {}
}

/// Summary used by `/extension` and `/info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub tools: BTreeMap<String, String>,
    pub prompt_text: String,
}

#[derive(Default)]
pub struct ExtensionSet {
    candidates: Vec<Arc<dyn Extension>>,
    loaded: Vec<Arc<dyn Extension>>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, extension: Arc<dyn Extension>) -> Self {
        self.add(extension);
        self
    }

    pub fn add(&mut self, extension: Arc<dyn Extension>) {
        self.candidates.push(extension);
    }

    /// Run every pending `on_load` and register the tools of those that load.
    /// An extension whose `on_load` fails is skipped with a warning.
    pub fn register_into(&mut self, registry: &mut ToolRegistry) {
        for extension in std::mem::take(&mut self.candidates) {
            if let Err(e) = extension.on_load() {
                warn!("Skipping extension '{}': {:#}", extension.name(), e);
                continue;
            }

            let tools = extension.tools();
            info!(
                "Loaded extension '{}' v{} with {} tools",
                extension.name(),
                extension.version(),
                tools.len()
            );
            for (name, handler) in tools {
                registry.register(name, handler, extension.name());
            }
            self.loaded.push(extension);
        }
    }

    /// Prompt texts of the loaded extensions, in load order.
    pub fn prompt_text(&self) -> String {
        self.loaded
            .iter()
            .map(|extension| extension.prompt_text())
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn names(&self) -> Vec<&str> {
        self.loaded.iter().map(|extension| extension.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    pub fn info(&self, name: &str) -> Option<ExtensionInfo> {
        self.loaded
            .iter()
            .find(|extension| extension.name() == name)
            .map(|extension| describe(extension.as_ref()))
    }

    pub fn infos(&self) -> Vec<ExtensionInfo> {
        self.loaded
            .iter()
            .map(|extension| describe(extension.as_ref()))
            .collect()
    }

    /// Run `on_unload` for every loaded extension, most recent first.
    pub fn unload_all(&mut self) {
        while let Some(extension) = self.loaded.pop() {
            info!("Unloading extension '{}'", extension.name());
            extension.on_unload();
        }
    }
}

fn describe(extension: &dyn Extension) -> ExtensionInfo {
    ExtensionInfo {
        name: extension.name().to_string(),
        description: extension.description().to_string(),
        version: extension.version().to_string(),
        author: extension.author().to_string(),
        tools: extension.tool_descriptions(),
        prompt_text: extension.prompt_text(),
    }
}
