use iflow_core::ui_writer::UiWriter;
use iflow_core::ExecutionResult;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Console implementation of UiWriter that prints to stdout
pub struct ConsoleUiWriter {
    /// The last character printed by a reply was a newline.
    at_line_start: AtomicBool,
}

impl ConsoleUiWriter {
    pub fn new() -> Self {
        Self {
            at_line_start: AtomicBool::new(true),
        }
    }
}

impl UiWriter for ConsoleUiWriter {
    fn print_assistant_start(&self) {
        println!();
        self.at_line_start.store(true, Ordering::SeqCst);
    }

    fn print_delta(&self, text: &str) {
        print!("{}", text);
        let _ = io::stdout().flush();
        self.at_line_start
            .store(text.ends_with('\n'), Ordering::SeqCst);
    }

    fn print_assistant_end(&self) {
        if !self.at_line_start.swap(true, Ordering::SeqCst) {
            println!();
        }
    }

    fn print_directive(&self, directive: &str, auto_approved: bool) {
        if auto_approved {
            println!("\x1b[35m⚡ {}\x1b[0m \x1b[2m(auto-approved)\x1b[0m", directive);
        } else {
            println!("\x1b[35m⚡ {}\x1b[0m", directive);
        }
    }

    fn print_tool_result(&self, tool: &str, result: &ExecutionResult, show_output: bool) {
        if !result.success {
            println!("\x1b[31m✗ {}: {}\x1b[0m", tool, result.message);
            return;
        }

        println!(
            "\x1b[32m✓ {}\x1b[0m \x1b[2m({})\x1b[0m",
            tool,
            summarize_output(&result.message)
        );
        if show_output {
            for line in result.message.lines() {
                println!("\x1b[2m  │ {}\x1b[0m", line);
            }
        }
    }

    fn print_status(&self, message: &str) {
        println!("\x1b[36m{}\x1b[0m", message);
    }

    fn print_warning(&self, message: &str) {
        println!("\x1b[33m⚠️  {}\x1b[0m", message);
    }

    fn print_error(&self, message: &str) {
        eprintln!("\x1b[31m❌ {}\x1b[0m", message);
    }

    fn print_debug(&self, message: &str) {
        println!("\x1b[2m[debug] {}\x1b[0m", message);
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

fn summarize_output(output: &str) -> String {
    match output.lines().count() {
        0 => "no output".to_string(),
        1 => "1 line".to_string(),
        n => format!("{} lines", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_output() {
        assert_eq!(summarize_output(""), "no output");
        assert_eq!(summarize_output("a.txt\n"), "1 line");
        assert_eq!(summarize_output("a\nb\nc"), "3 lines");
    }

    #[test]
    fn test_line_tracking() {
        let writer = ConsoleUiWriter::new();
        writer.print_delta("partial");
        assert!(!writer.at_line_start.load(Ordering::SeqCst));
        writer.print_assistant_end();
        assert!(writer.at_line_start.load(Ordering::SeqCst));
    }
}
