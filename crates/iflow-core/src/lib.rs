pub mod cancel;
pub mod commands;
pub mod conversation;
pub mod directive;
pub mod extension;
pub mod extensions;
pub mod permission;
pub mod prompt;
pub mod session;
pub mod store;
pub mod task_result;
pub mod tools;
pub mod ui_writer;

mod dispatch;
mod streaming;

pub use cancel::CancelSignal;
pub use commands::{CommandError, CommandOutcome, ExtensionCommand, SlashCommand, HELP_TEXT};
pub use conversation::ConversationState;
pub use directive::Directive;
pub use extension::{Extension, ExtensionInfo, ExtensionSet};
pub use permission::{Confirmer, GatedConfirmer, PermissionGate, StaticConfirmer, EXIT_TITLE};
pub use session::SessionConfig;
pub use store::{ConversationStore, SavedConversation};
pub use task_result::{TurnOutcome, TurnResult};
pub use tools::{ExecutionResult, ToolHandler, ToolRegistry};

use anyhow::Result;
use iflow_config::Config;
use iflow_providers::{LLMProvider, OpenAiCompatProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::extensions::ExampleExtension;
use crate::tools::{RequestControlTool, ShellTool, WaitTool, CORE_OWNER};
use crate::ui_writer::UiWriter;

/// Drives a conversation: streams replies, runs the directive at the end of
/// each one and feeds the result back until the model stops asking.
pub struct Agent<W: UiWriter> {
    provider: Box<dyn LLMProvider>,
    session: SessionConfig,
    conversation: ConversationState,
    tools: ToolRegistry,
    extensions: ExtensionSet,
    confirmer: Arc<dyn Confirmer>,
    store: Option<ConversationStore>,
    ui_writer: W,
    session_id: String,
}

impl<W: UiWriter> Agent<W> {
    pub fn new(
        provider: Box<dyn LLMProvider>,
        session: SessionConfig,
        extensions: ExtensionSet,
        confirmer: Arc<dyn Confirmer>,
        ui_writer: W,
    ) -> Self {
        Self::with_shell(
            provider,
            session,
            extensions,
            confirmer,
            ui_writer,
            ShellTool::default(),
        )
    }

    /// Agent for the configured endpoint with the bundled extensions and a
    /// history store in the configured directory.
    pub fn from_config(config: &Config, confirmer: Arc<dyn Confirmer>, ui_writer: W) -> Result<Self> {
        let provider = OpenAiCompatProvider::new(Some(config.api.timeout_secs))?;
        let extensions = ExtensionSet::new().with(Arc::new(ExampleExtension));
        let shell = ShellTool::new(Duration::from_secs(config.tools.shell_timeout_secs));

        let agent = Self::with_shell(
            Box::new(provider),
            SessionConfig::from_config(config),
            extensions,
            confirmer,
            ui_writer,
            shell,
        )
        .with_store(ConversationStore::new(config.history_dir()));
        Ok(agent)
    }

    fn with_shell(
        provider: Box<dyn LLMProvider>,
        session: SessionConfig,
        mut extensions: ExtensionSet,
        confirmer: Arc<dyn Confirmer>,
        ui_writer: W,
        shell: ShellTool,
    ) -> Self {
        let gate = Arc::new(PermissionGate::new());

        let mut tools = ToolRegistry::new();
        tools.register("cmd", Arc::new(shell), CORE_OWNER);
        tools.register(
            "request_control",
            Arc::new(RequestControlTool::new(gate.clone())),
            CORE_OWNER,
        );
        tools.register("wait", Arc::new(WaitTool), CORE_OWNER);
        extensions.register_into(&mut tools);

        let system_prompt = prompt::build_system_prompt(&extensions.prompt_text());
        let conversation = ConversationState::with_permission(system_prompt, gate);

        let session_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Session {} using {} at {} with {} tools",
            session_id,
            session.model(),
            session.api_url(),
            tools.len()
        );
        debug!("Tools: {}", tools.names().join(", "));

        Self {
            provider,
            session,
            conversation,
            tools,
            extensions,
            confirmer,
            store: None,
            ui_writer,
            session_id,
        }
    }

    pub fn with_store(mut self, store: ConversationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionConfig {
        &mut self.session
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Handle a surface can keep to stop the running turn from elsewhere,
    /// e.g. a Ctrl-C handler.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.conversation.cancel_signal().clone()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    pub fn store(&self) -> Option<&ConversationStore> {
        self.store.as_ref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn ui_writer(&self) -> &W {
        &self.ui_writer
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Unload every extension. The agent keeps working but extension tools
    /// should not be used afterwards.
    pub fn shutdown(&mut self) {
        self.extensions.unload_all();
    }
}
