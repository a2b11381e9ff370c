//! Slash commands, typed by the operator as `/name args` or emitted by the
//! model as `@/name args`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionCommand {
    List,
    Info(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Info,
    Debug(bool),
    Api(String),
    Model(String),
    Url(String),
    History,
    Load(String),
    Clear,
    Export(String),
    Import(String),
    Stop,
    Extension(ExtensionCommand),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command: /{0} (try /help)")]
    Unknown(String),
    #[error("commands start with '/'")]
    NotACommand,
}

/// What running a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Done; the text is shown to the operator and returned to the model.
    Done(String),
    /// Confirmed `/exit`: the surface should shut down.
    Exit,
}

pub const HELP_TEXT: &str = "\
# Commands

| command | effect |
|---|---|
| `/help` | show this help |
| `/info` | show model, URL, key status, permission state and extensions |
| `/debug on\\|off` | show full tool output and stream statistics |
| `/api <key>` | set the API key |
| `/model <name>` | switch model |
| `/url <url>` | change the chat completion URL |
| `/history` | list saved conversations |
| `/load <name>` | continue a saved conversation |
| `/clear` | start over, keeping the system prompt |
| `/export <file>` | write the conversation as JSON |
| `/import <file>` | replace the conversation from a JSON file |
| `/stop` | stop the current reply |
| `/extension [list\\|info <name>]` | describe loaded extensions |
| `/exit` | quit |

End a line with `\\` to continue typing on the next line. **Ctrl-C** stops a reply, **Ctrl-D** quits.

The model runs the same commands by writing `@/name args` at the end of a reply, and tools with `@tool(args)`, for example `@cmd(ls)`. Each one asks for confirmation until `@request_control()` has been granted.";

impl SlashCommand {
    /// Parse an operator line such as `/model qwen3-max`.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let Some(body) = line.strip_prefix('/') else {
            return Err(CommandError::NotACommand);
        };
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        Self::from_parts(name, args)
    }

    /// Build from a command name (without the slash) and its argument text.
    pub fn from_parts(name: &str, args: &str) -> Result<Self, CommandError> {
        let args = args.trim();
        let required = |usage: &'static str| {
            if args.is_empty() {
                Err(CommandError::Usage(usage))
            } else {
                Ok(args.to_string())
            }
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "help" => SlashCommand::Help,
            "info" => SlashCommand::Info,
            "debug" => match args.to_ascii_lowercase().as_str() {
                "on" => SlashCommand::Debug(true),
                "off" => SlashCommand::Debug(false),
                _ => return Err(CommandError::Usage("/debug on|off")),
            },
            "api" => SlashCommand::Api(required("/api <key>")?),
            "model" => SlashCommand::Model(required("/model <name>")?),
            "url" => SlashCommand::Url(required("/url <url>")?),
            "history" => SlashCommand::History,
            "load" => SlashCommand::Load(required("/load <name>")?),
            "clear" => SlashCommand::Clear,
            "export" => SlashCommand::Export(required("/export <file>")?),
            "import" => SlashCommand::Import(required("/import <file>")?),
            "stop" => SlashCommand::Stop,
            "extension" => {
                let (sub, rest) = match args.split_once(char::is_whitespace) {
                    Some((sub, rest)) => (sub, rest.trim()),
                    None => (args, ""),
                };
                match (sub, rest) {
                    ("" | "list", "") => SlashCommand::Extension(ExtensionCommand::List),
                    ("info", name) if !name.is_empty() => {
                        SlashCommand::Extension(ExtensionCommand::Info(name.to_string()))
                    }
                    _ => return Err(CommandError::Usage("/extension [list|info <name>]")),
                }
            }
            "exit" | "quit" => SlashCommand::Exit,
            _ => return Err(CommandError::Unknown(name.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SlashCommand::Help => "help",
            SlashCommand::Info => "info",
            SlashCommand::Debug(_) => "debug",
            SlashCommand::Api(_) => "api",
            SlashCommand::Model(_) => "model",
            SlashCommand::Url(_) => "url",
            SlashCommand::History => "history",
            SlashCommand::Load(_) => "load",
            SlashCommand::Clear => "clear",
            SlashCommand::Export(_) => "export",
            SlashCommand::Import(_) => "import",
            SlashCommand::Stop => "stop",
            SlashCommand::Extension(_) => "extension",
            SlashCommand::Exit => "exit",
        }
    }
}
