//! Extraction of the directive a reply ends with.
//!
//! Two forms are recognised anywhere in the text:
//!
//! * `@/name args` runs an operator command; `args` run to the end of the line.
//!   With nothing after the name, the following line becomes the arguments.
//! * `@name(args)` calls a tool; `args` stop at the first `)`.
//!
//! Only the match that starts last is returned. Everything before it is prose,
//! including directives the model mentions while explaining itself.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Command { name: String, raw_args: String },
    ToolCall { name: String, raw_args: String },
}

impl Directive {
    pub fn name(&self) -> &str {
        match self {
            Directive::Command { name, .. } | Directive::ToolCall { name, .. } => name,
        }
    }

    pub fn raw_args(&self) -> &str {
        match self {
            Directive::Command { raw_args, .. } | Directive::ToolCall { raw_args, .. } => raw_args,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Directive::Command { .. })
    }

    /// The operator-facing spelling, e.g. `/model qwen3` for a command.
    pub fn command_line(&self) -> String {
        match self {
            Directive::Command { name, raw_args } if raw_args.is_empty() => format!("/{}", name),
            Directive::Command { name, raw_args } => format!("/{} {}", name, raw_args),
            Directive::ToolCall { name, raw_args } => format!("{}({})", name, raw_args),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.command_line())
    }
}

fn command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // `\s+` may cross a newline, so a bare `@/clear` takes the next line as its arguments.
    PATTERN.get_or_init(|| Regex::new(r"@/(\w+)(?:\s+(.*))?").expect("valid command regex"))
}

fn tool_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@(\w+)\((.*?)\)").expect("valid tool regex"))
}

/// Return the directive with the greatest start offset, if any.
pub fn extract(text: &str) -> Option<Directive> {
    let commands = command_pattern().captures_iter(text).map(|caps| {
        let start = caps.get(0).map_or(0, |m| m.start());
        let directive = Directive::Command {
            name: caps[1].to_string(),
            raw_args: caps
                .get(2)
                .map(|m| m.as_str().trim_end().to_string())
                .unwrap_or_default(),
        };
        (start, directive)
    });

    let tools = tool_pattern().captures_iter(text).map(|caps| {
        let start = caps.get(0).map_or(0, |m| m.start());
        let directive = Directive::ToolCall {
            name: caps[1].to_string(),
            raw_args: caps[2].to_string(),
        };
        (start, directive)
    });

    commands
        .chain(tools)
        .max_by_key(|(start, _)| *start)
        .map(|(_, directive)| directive)
}
