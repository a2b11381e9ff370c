use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use iflow_config::Config;
use iflow_core::{Agent, CommandOutcome, Confirmer, SessionConfig, SlashCommand, TurnOutcome};
use iflow_providers::ProviderError;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

mod confirm;
mod tui;
mod ui_writer_impl;
use confirm::{AssumeYes, ConsoleConfirmer};
use tui::SimpleOutput;
use ui_writer_impl::ConsoleUiWriter;

#[derive(Parser)]
#[command(name = "iflow")]
#[command(about = "A streaming chat client whose replies can run local tools")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to ~/.iflow/config.toml)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the configured model
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Override the chat completion URL
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Answer yes to every confirmation except the assistant quitting
    #[arg(short, long)]
    pub yes: bool,

    /// Message to send (if provided, runs a single turn instead of interactive)
    pub task: Option<String>,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load_with_overrides(cli.config.as_deref(), cli.model.clone(), cli.url.clone())?;
    init_logging(cli.verbose, config.log_file().as_deref())?;
    info!("Starting iflow");

    let output = SimpleOutput::new();
    ensure_api_key(&mut config, cli.config.as_deref(), &output).await?;

    let confirmer: Arc<dyn Confirmer> = if cli.yes {
        Arc::new(AssumeYes::new(ConsoleConfirmer))
    } else {
        Arc::new(ConsoleConfirmer)
    };
    let mut agent = Agent::from_config(&config, confirmer, ConsoleUiWriter::new())?;
    let initial_session = agent.session().clone();

    if let Some(task) = cli.task {
        info!("Sending single message");
        run_turn(&mut agent, &task, &output).await;
    } else {
        output.print_banner(
            agent.session().model(),
            agent.session().api_url(),
            &agent.session().api_key_status(Utc::now()),
        );
        run_interactive(&mut agent, &output).await?;
    }

    finish(
        &mut agent,
        &initial_session,
        &mut config,
        cli.config.as_deref(),
        &output,
    )
    .await;
    output.print("👋 Goodbye!");
    Ok(())
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // Info-level logs would interleave with streamed replies, so they stay
    // behind --verbose.
    let level = if verbose { "debug" } else { "warn" };
    let mut filter = EnvFilter::from_default_env();
    for target in [
        env!("CARGO_PKG_NAME"),
        "iflow",
        "iflow_core",
        "iflow_providers",
        "iflow_config",
        "iflow_execution",
    ] {
        let target = target.replace('-', "_");
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    let registry = tracing_subscriber::registry().with(filter);
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

/// Warn about a missing or expired key and offer to enter a new one.
async fn ensure_api_key(
    config: &mut Config,
    config_path: Option<&str>,
    output: &SimpleOutput,
) -> Result<()> {
    let now = Utc::now();
    if !config.api_key_expired(now) {
        let days = config.api_key_days_remaining(now);
        if days <= 1 {
            output.print_warning(&format!(
                "Your API key expires within {} day(s). Use /api <key> to renew it.",
                days
            ));
        }
        return Ok(());
    }

    if config.api.api_key.is_some() {
        output.print_warning("Your API key has expired.");
    } else {
        output.print_warning("No API key configured.");
    }
    let answer = confirm::read_line("Enter an API key (leave empty to skip): ".to_string())
        .await
        .context("Failed to read API key")?;
    match answer.filter(|key| !key.is_empty()) {
        Some(key) => {
            config.set_api_key(key, now);
            let path = config.save(config_path)?;
            output.print_status(&format!("API key saved to {}", path.display()));
        }
        None => output.print_warning("Continuing without a valid key; set one with /api <key>."),
    }
    Ok(())
}

async fn run_interactive(agent: &mut Agent<ConsoleUiWriter>, output: &SimpleOutput) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    let history_file = dirs::home_dir().map(|mut path| {
        path.push(".iflow_history");
        path
    });
    if let Some(ref history_path) = history_file {
        let _ = rl.load_history(history_path);
    }

    let mut multiline_buffer = String::new();
    loop {
        let prompt = if multiline_buffer.is_empty() {
            "iflow> "
        } else {
            "... > "
        };

        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim_end();
                if let Some(head) = trimmed.strip_suffix('\\') {
                    multiline_buffer.push_str(head);
                    multiline_buffer.push('\n');
                    continue;
                }

                multiline_buffer.push_str(&line);
                let input = std::mem::take(&mut multiline_buffer).trim().to_string();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(&input)?;

                let exit = if input.starts_with('/') {
                    handle_command(agent, &input, output).await
                } else {
                    run_turn(agent, &input, output).await
                };
                if exit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                if multiline_buffer.is_empty() {
                    output.print("CTRL-C (use /exit or Ctrl-D to quit)");
                } else {
                    output.print("Multi-line input cancelled");
                    multiline_buffer.clear();
                }
            }
            Err(ReadlineError::Eof) => {
                output.print("CTRL-D");
                break;
            }
            Err(err) => {
                error!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(ref history_path) = history_file {
        let _ = rl.save_history(history_path);
    }
    Ok(())
}

/// Run an operator command. Returns true when the session should end.
async fn handle_command(
    agent: &mut Agent<ConsoleUiWriter>,
    input: &str,
    output: &SimpleOutput,
) -> bool {
    let command = match SlashCommand::parse(input) {
        Ok(command) => command,
        Err(e) => {
            output.print_error(&e.to_string());
            return false;
        }
    };

    match agent.run_command(command).await {
        Ok(CommandOutcome::Done(text)) => {
            output.print_smart(&text);
            false
        }
        Ok(CommandOutcome::Exit) => true,
        Err(e) => {
            handle_execution_error(&e, input, output);
            false
        }
    }
}

/// Send one message and drive the turn to completion. Ctrl-C stops the reply
/// and the turn unwinds on its own. Returns true when `/exit` was confirmed.
async fn run_turn(agent: &mut Agent<ConsoleUiWriter>, input: &str, output: &SimpleOutput) -> bool {
    let cancel = agent.cancel_signal();
    let turn = agent.send(input);
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            _ = tokio::signal::ctrl_c() => {
                cancel.request();
                output.print_warning("Stopping the reply (Ctrl-C)");
            }
        }
    };

    match result {
        Ok(result) => result.outcome == TurnOutcome::ExitRequested,
        Err(e) => {
            handle_execution_error(&e, input, output);
            false
        }
    }
}

fn handle_execution_error(e: &anyhow::Error, input: &str, output: &SimpleOutput) {
    error!("Error: {}", e);
    let mut source = e.source();
    let mut depth = 1;
    while let Some(err) = source {
        error!("  Caused by [{}]: {}", depth, err);
        source = err.source();
        depth += 1;
    }
    error!("Input: {}", input);

    output.print_error(&format!("{:#}", e));
    match e.downcast_ref::<ProviderError>() {
        Some(ProviderError::MissingApiKey) | Some(ProviderError::Http { status: 401 | 403, .. }) => {
            output.print("💡 Check your API key and set a new one with /api <key>.");
        }
        Some(ProviderError::Transport(_)) | Some(ProviderError::Timeout(_)) => {
            output.print("💡 The chat endpoint could not be reached. Check /url and your network.");
        }
        _ => {}
    }
}

/// Save the conversation, persist changed settings and unload extensions.
async fn finish(
    agent: &mut Agent<ConsoleUiWriter>,
    initial_session: &SessionConfig,
    config: &mut Config,
    config_path: Option<&str>,
    output: &SimpleOutput,
) {
    match agent.save_conversation().await {
        Ok(Some(path)) => output.print_status(&format!("Conversation saved to {}", path.display())),
        Ok(None) => {}
        Err(e) => {
            error!("Failed to save conversation: {:#}", e);
            output.print_error(&format!("Failed to save conversation: {:#}", e));
        }
    }

    if agent.session() != initial_session {
        agent.session().write_back(config);
        if let Err(e) = config.save(config_path) {
            error!("Failed to save configuration: {:#}", e);
            output.print_error(&format!("Failed to save configuration: {:#}", e));
        }
    }

    agent.shutdown();
}
