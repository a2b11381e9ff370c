use crossterm::style::{Color, ResetColor, SetForegroundColor};
use termimad::MadSkin;

const PURPLE: Color = Color::Rgb { r: 189, g: 147, b: 249 };
const PINK: Color = Color::Rgb { r: 255, g: 121, b: 198 };
const CYAN: Color = Color::Rgb { r: 139, g: 233, b: 253 };
const GREEN: Color = Color::Rgb { r: 80, g: 250, b: 123 };
const YELLOW: Color = Color::Rgb { r: 241, g: 250, b: 140 };
const RED: Color = Color::Rgb { r: 255, g: 85, b: 85 };
const SELECTION: Color = Color::Rgb { r: 68, g: 71, b: 90 };

/// Operator-facing output outside of a streamed reply: banners, command
/// results and errors. Markdown is rendered with a Dracula skin.
pub struct SimpleOutput {
    mad_skin: MadSkin,
}

impl SimpleOutput {
    pub fn new() -> Self {
        let mut mad_skin = MadSkin::default();
        mad_skin.set_headers_fg(PURPLE);
        mad_skin.bold.set_fg(PINK);
        mad_skin.italic.set_fg(CYAN);
        mad_skin.code_block.set_bg(SELECTION);
        mad_skin.code_block.set_fg(GREEN);
        mad_skin.inline_code.set_bg(SELECTION);
        mad_skin.inline_code.set_fg(YELLOW);
        Self { mad_skin }
    }

    /// Headings, tables, inline code or bold text.
    fn has_markdown(&self, text: &str) -> bool {
        text.contains("**")
            || text.contains('`')
            || text.lines().any(|line| {
                let trimmed = line.trim();
                trimmed.starts_with("# ")
                    || trimmed.starts_with("## ")
                    || (trimmed.starts_with('|') && trimmed.ends_with('|'))
            })
    }

    pub fn print(&self, text: &str) {
        println!("{}", text);
    }

    pub fn print_smart(&self, text: &str) {
        if self.has_markdown(text) {
            self.print_markdown(text);
        } else {
            self.print(text);
        }
    }

    pub fn print_markdown(&self, markdown: &str) {
        self.mad_skin.print_text(markdown);
    }

    pub fn print_status(&self, text: &str) {
        self.print_colored(CYAN, text);
    }

    pub fn print_warning(&self, text: &str) {
        self.print_colored(YELLOW, &format!("⚠️  {}", text));
    }

    pub fn print_error(&self, text: &str) {
        self.print_colored(RED, &format!("❌ {}", text));
    }

    pub fn print_banner(&self, model: &str, url: &str, key_status: &str) {
        println!();
        self.print_colored(PURPLE, "🌊 iFlow chat");
        println!("   model: {}", model);
        println!("   url:   {}", url);
        println!("   key:   {}", key_status);
        println!();
        println!("Type /help for commands. End a line with \\ to keep typing.");
        println!();
    }

    fn print_colored(&self, color: Color, text: &str) {
        println!("{}{}{}", SetForegroundColor(color), text, ResetColor);
    }
}
