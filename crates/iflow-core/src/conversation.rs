use anyhow::{Context, Result};
use iflow_providers::{Message, MessageRole};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::permission::PermissionGate;

/// Message history of one conversation plus the state its turns share.
///
/// Index 0 holds the only system message; every other message is a user or
/// assistant turn in order.
#[derive(Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    name: Option<String>,
    permission: Arc<PermissionGate>,
    cancel: CancelSignal,
}

impl ConversationState {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self::with_permission(system_prompt, Arc::new(PermissionGate::new()))
    }

    /// Start a conversation around an existing gate, e.g. one already shared
    /// with the `request_control` tool.
    pub fn with_permission(system_prompt: impl Into<String>, permission: Arc<PermissionGate>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            name: None,
            permission,
            cancel: CancelSignal::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }

    /// User and assistant messages, i.e. everything but the system prompt.
    pub fn turn_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .count()
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Append a user or assistant message. Empty content is skipped, and a
    /// system message is never appended after the first.
    pub fn push(&mut self, message: Message) -> bool {
        if message.content.trim().is_empty() {
            warn!("Skipping empty {:?} message", message.role);
            return false;
        }
        if message.role == MessageRole::System {
            warn!("Ignoring extra system message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Back to just the system message. The conversation loses its name so
    /// the next save starts a new file.
    pub fn clear(&mut self) {
        let keep = usize::from(self.system_prompt().is_some());
        self.messages.truncate(keep);
        self.name = None;
        debug!("Conversation cleared");
    }

    /// Replace the history, normalised so that index 0 is the system message.
    pub fn replace_messages(&mut self, messages: Vec<Message>, default_system: &str) {
        self.messages = normalize(messages, default_system);
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn permission(&self) -> &Arc<PermissionGate> {
        &self.permission
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.messages).context("Failed to serialize conversation")
    }

    pub fn export_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.export_json()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Replace the history with the messages in `json`, a JSON array of
    /// messages. Returns the number of messages now held.
    pub fn import_json(&mut self, json: &str, default_system: &str) -> Result<usize> {
        let messages = parse_messages(json)?;
        self.replace_messages(messages, default_system);
        Ok(self.messages.len())
    }

    pub fn import_from(&mut self, path: &Path, default_system: &str) -> Result<usize> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        self.import_json(&json, default_system)
            .with_context(|| format!("Failed to import {}", path.display()))
    }
}

pub fn parse_messages(json: &str) -> Result<Vec<Message>> {
    serde_json::from_str(json).context("Expected a JSON array of {role, content} messages")
}

/// `[system, ...turns]`: the first system message found (or `default_system`)
/// followed by every non-system message in order.
pub fn normalize(messages: Vec<Message>, default_system: &str) -> Vec<Message> {
    let (systems, turns): (Vec<Message>, Vec<Message>) = messages
        .into_iter()
        .partition(|m| m.role == MessageRole::System);

    let system = systems.into_iter().next().unwrap_or_else(|| {
        debug!("No system message found, using the default");
        Message::system(default_system)
    });

    std::iter::once(system).chain(turns).collect()
}
