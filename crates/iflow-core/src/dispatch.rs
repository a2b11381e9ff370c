//! Running directives and slash commands on behalf of a turn.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use iflow_config::API_KEY_VALID_DAYS;
use iflow_providers::{CompletionRequest, Message};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::commands::{CommandOutcome, ExtensionCommand, SlashCommand, HELP_TEXT};
use crate::directive::Directive;
use crate::permission::{GatedConfirmer, EXIT_TITLE};
use crate::prompt::{DEFAULT_IMPORT_SYSTEM_PROMPT, TITLE_INSTRUCTIONS};
use crate::store::timestamp_name;
use crate::tools::ExecutionResult;
use crate::ui_writer::UiWriter;

const TITLE_MAX_CHARS: usize = 60;

/// What the turn does after a directive ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DirectiveFlow {
    /// Feed this text back to the model and continue.
    Continue(String),
    /// The operator confirmed `/exit`.
    Exit,
}

/// Synthetic user message carrying a directive result back to the model.
pub(crate) fn format_result_message(body: &str) -> String {
    format!(
        "Directive result:\n{}\n\nPlease continue your reply based on this result.",
        body
    )
}

fn format_tool_result(name: &str, result: &ExecutionResult) -> String {
    if !result.success {
        format!("[tool {}] failed: {}", name, result.message)
    } else if result.message.trim().is_empty() {
        format!("[tool {}] succeeded with no output", name)
    } else {
        format!("[tool {} output]:\n{}", name, result.message)
    }
}

impl<W: UiWriter> crate::Agent<W> {
    pub(crate) async fn execute_directive(&mut self, directive: &Directive) -> DirectiveFlow {
        match directive {
            Directive::Command { name, raw_args } => {
                self.execute_command_directive(directive, name, raw_args)
                    .await
            }
            Directive::ToolCall { name, raw_args } => {
                DirectiveFlow::Continue(self.execute_tool_directive(directive, name, raw_args).await)
            }
        }
    }

    async fn execute_command_directive(
        &mut self,
        directive: &Directive,
        name: &str,
        raw_args: &str,
    ) -> DirectiveFlow {
        let command = match SlashCommand::from_parts(name, raw_args) {
            Ok(command) => command,
            Err(e) => {
                warn!("Model issued an invalid command {}: {}", directive, e);
                self.ui_writer
                    .print_warning(&format!("Ignoring {}: {}", directive, e));
                return DirectiveFlow::Continue(format!("[system] command /{} failed: {}", name, e));
            }
        };

        let gate = self.conversation.permission().clone();
        let is_exit = command == SlashCommand::Exit;
        self.ui_writer
            .print_directive(&directive.to_string(), gate.is_elevated() && !is_exit);

        // Exit always asks, elevated or not.
        let allowed = if is_exit {
            self.confirmer
                .confirm(EXIT_TITLE, "The assistant wants to quit iflow. Allow?")
                .await
        } else {
            gate.authorize(
                self.confirmer.as_ref(),
                "Run command",
                &format!("The assistant wants to run {}. Allow?", directive.command_line()),
            )
            .await
        };
        if !allowed {
            info!("Operator declined /{}", command.name());
            return DirectiveFlow::Continue(format!(
                "[system] user declined command /{}",
                command.name()
            ));
        }

        let label = command.name();
        match self.run_command(command).await {
            Ok(CommandOutcome::Done(text)) => {
                self.ui_writer.print_status(&text);
                DirectiveFlow::Continue(format!("[system] command /{}: {}", label, text))
            }
            Ok(CommandOutcome::Exit) => DirectiveFlow::Exit,
            Err(e) => {
                self.ui_writer
                    .print_error(&format!("/{} failed: {:#}", label, e));
                DirectiveFlow::Continue(format!("[system] command /{} failed: {:#}", label, e))
            }
        }
    }

    async fn execute_tool_directive(
        &mut self,
        directive: &Directive,
        name: &str,
        raw_args: &str,
    ) -> String {
        let gate = self.conversation.permission().clone();
        let confirmer = GatedConfirmer::new(gate.clone(), self.confirmer.clone());

        // Unknown names fail in dispatch without bothering the operator.
        if !self.tools.contains(name) {
            let result = self.tools.dispatch(name, raw_args, &confirmer).await;
            self.ui_writer.print_warning(&result.message);
            return format_tool_result(name, &result);
        }

        self.ui_writer
            .print_directive(&directive.to_string(), gate.is_elevated());
        let allowed = gate
            .authorize(
                self.confirmer.as_ref(),
                "Run tool",
                &format!("The assistant wants to run {}. Allow?", directive.command_line()),
            )
            .await;
        if !allowed {
            info!("Operator declined tool {}", name);
            return format!("[system] user declined tool {}", name);
        }

        let result = self.tools.dispatch(name, raw_args, &confirmer).await;
        self.ui_writer
            .print_tool_result(name, &result, self.session.debug());
        format_tool_result(name, &result)
    }

    /// Run a slash command typed by the operator or confirmed for the model.
    pub async fn run_command(&mut self, command: SlashCommand) -> Result<CommandOutcome> {
        debug!("Running /{}", command.name());
        let text = match command {
            SlashCommand::Help => HELP_TEXT.to_string(),
            SlashCommand::Info => self.info_text(),
            SlashCommand::Debug(enabled) => {
                self.session.set_debug(enabled);
                format!("debug mode {}", if enabled { "on" } else { "off" })
            }
            SlashCommand::Api(key) => {
                self.session.set_api_key(key, Utc::now());
                format!("API key updated, valid for {} days", API_KEY_VALID_DAYS)
            }
            SlashCommand::Model(model) => {
                self.session.set_model(model);
                format!("model set to {}", self.session.model())
            }
            SlashCommand::Url(url) => {
                self.session.set_api_url(url);
                format!("API URL set to {}", self.session.api_url())
            }
            SlashCommand::History => self.history_text()?,
            SlashCommand::Load(name) => {
                let store = self
                    .store
                    .as_ref()
                    .context("History storage is disabled")?;
                let messages = store.load(&name)?;
                let name = name.trim();
                let name = name.strip_suffix(".json").unwrap_or(name).to_string();
                self.conversation
                    .replace_messages(messages, DEFAULT_IMPORT_SYSTEM_PROMPT);
                let text = format!(
                    "loaded '{}' ({} messages)",
                    name,
                    self.conversation.len()
                );
                self.conversation.set_name(Some(name));
                text
            }
            SlashCommand::Clear => {
                self.conversation.clear();
                "conversation cleared".to_string()
            }
            SlashCommand::Export(path) => {
                let path = expand_path(&path);
                self.conversation.export_to(&path)?;
                format!(
                    "exported {} messages to {}",
                    self.conversation.len(),
                    path.display()
                )
            }
            SlashCommand::Import(path) => {
                let path = expand_path(&path);
                let count = self
                    .conversation
                    .import_from(&path, DEFAULT_IMPORT_SYSTEM_PROMPT)?;
                self.conversation.set_name(None);
                format!("imported {} messages from {}", count, path.display())
            }
            SlashCommand::Stop => {
                self.conversation.cancel_signal().request();
                "stopping the current reply".to_string()
            }
            SlashCommand::Extension(ExtensionCommand::List) => self.extension_list_text(),
            SlashCommand::Extension(ExtensionCommand::Info(name)) => {
                self.extension_info_text(&name)?
            }
            SlashCommand::Exit => return Ok(CommandOutcome::Exit),
        };
        Ok(CommandOutcome::Done(text))
    }

    fn info_text(&self) -> String {
        let extensions = self.extensions.names();
        let mut lines = vec![
            format!("model: {}", self.session.model()),
            format!("url: {}", self.session.api_url()),
            format!(
                "api key: {} ({})",
                self.session.masked_api_key(),
                self.session.api_key_status(Utc::now())
            ),
            format!("debug: {}", if self.session.debug() { "on" } else { "off" }),
            format!("control: {}", self.conversation.permission().state_label()),
            format!(
                "messages: {} ({} turns)",
                self.conversation.len(),
                self.conversation.turn_count()
            ),
            format!("session: {}", self.session_id),
        ];
        if let Some(name) = self.conversation.name() {
            lines.push(format!("conversation: {}", name));
        }
        lines.push(format!(
            "extensions: {}",
            if extensions.is_empty() {
                "none".to_string()
            } else {
                extensions.join(", ")
            }
        ));
        lines.push(format!("tools: {}", self.tools.names().join(", ")));
        lines.join("\n")
    }

    fn history_text(&self) -> Result<String> {
        let Some(store) = self.store.as_ref() else {
            return Ok("history storage is disabled".to_string());
        };
        let saved = store.list()?;
        if saved.is_empty() {
            return Ok("no saved conversations".to_string());
        }
        let lines: Vec<String> = saved
            .iter()
            .map(|c| format!("{}  ({})", c.name, c.modified.format("%Y-%m-%d %H:%M")))
            .collect();
        Ok(format!(
            "{} saved conversations, newest first:\n{}",
            saved.len(),
            lines.join("\n")
        ))
    }

    fn extension_list_text(&self) -> String {
        let infos = self.extensions.infos();
        if infos.is_empty() {
            return "no extensions loaded".to_string();
        }
        infos
            .iter()
            .map(|info| {
                let tools: Vec<&str> = info.tools.keys().map(String::as_str).collect();
                format!(
                    "{} v{}: {} [{}]",
                    info.name,
                    info.version,
                    info.description,
                    tools.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn extension_info_text(&self, name: &str) -> Result<String> {
        let info = self
            .extensions
            .info(name)
            .with_context(|| format!("No extension named '{}'", name))?;
        let mut lines = vec![
            format!("{} v{} by {}", info.name, info.version, info.author),
            info.description.clone(),
            "tools:".to_string(),
        ];
        for (tool, description) in &info.tools {
            if description.is_empty() {
                lines.push(format!("  {}", tool));
            } else {
                lines.push(format!("  {}: {}", tool, description));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Save the conversation under its name, asking the model for a title
    /// first if it has none. `None` when there is no store or nothing to save.
    pub async fn save_conversation(&mut self) -> Result<Option<PathBuf>> {
        let Some(store) = self.store.clone() else {
            return Ok(None);
        };
        if self.conversation.turn_count() == 0 {
            return Ok(None);
        }

        let name = match self.conversation.name() {
            Some(name) => name.to_string(),
            None => {
                let mut title = self.generate_title().await;
                if store.path_for(&title).exists() {
                    title = format!("{} {}", title, timestamp_name(Local::now()));
                }
                self.conversation.set_name(Some(title.clone()));
                title
            }
        };

        let path = store.save(&name, self.conversation.messages())?;
        Ok(Some(path))
    }

    pub(crate) async fn auto_save(&mut self) {
        if !self.session.auto_save() || self.store.is_none() {
            return;
        }
        if let Err(e) = self.save_conversation().await {
            warn!("Auto-save failed: {:#}", e);
        }
    }

    /// Short title from the first user messages; a timestamp when the model
    /// cannot provide one.
    async fn generate_title(&self) -> String {
        let excerpt: Vec<&str> = self.conversation.user_messages().take(3).collect();
        if excerpt.is_empty() {
            return timestamp_name(Local::now());
        }

        let request = CompletionRequest {
            model: self.session.model().to_string(),
            messages: vec![
                Message::system(TITLE_INSTRUCTIONS),
                Message::user(excerpt.join("\n")),
            ],
            max_tokens: Some(50),
            temperature: Some(0.3),
            top_p: None,
            stream: false,
        };

        match self
            .provider
            .complete(&self.session.endpoint(), request)
            .await
        {
            Ok(response) => clean_title(&response.content).unwrap_or_else(|| {
                debug!("Model returned an unusable title: {:?}", response.content);
                timestamp_name(Local::now())
            }),
            Err(e) => {
                debug!("Title generation failed: {:#}", e);
                timestamp_name(Local::now())
            }
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path.trim()).into_owned())
}

/// First non-empty line without quotes or punctuation, whitespace collapsed.
fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let stripped: String = line
        .chars()
        .map(|c| {
            let keep = c == '-' || c == '_' || !(c.is_ascii_punctuation() || "“”‘’«»《》「」。，、！？：；".contains(c));
            if keep {
                c
            } else {
                ' '
            }
        })
        .collect();
    let title = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let title: String = title.chars().take(TITLE_MAX_CHARS).collect();
    let title = title.trim().to_string();
    (!title.is_empty()).then_some(title)
}
