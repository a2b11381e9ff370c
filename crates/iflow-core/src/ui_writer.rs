use crate::tools::ExecutionResult;

/// Where the agent reports what happens during a turn.
pub trait UiWriter: Send + Sync {
    /// A new assistant reply begins streaming.
    fn print_assistant_start(&self);

    /// A piece of the assistant reply, in arrival order.
    fn print_delta(&self, text: &str);

    /// The reply stream ended, cleanly or not.
    fn print_assistant_end(&self);

    /// The model issued a directive. `auto_approved` is set when it runs
    /// without asking because the session is elevated.
    fn print_directive(&self, directive: &str, auto_approved: bool);

    /// Outcome of a tool call; the output itself only when `show_output`.
    fn print_tool_result(&self, tool: &str, result: &ExecutionResult, show_output: bool);

    fn print_status(&self, message: &str);

    fn print_warning(&self, message: &str);

    fn print_error(&self, message: &str);

    fn print_debug(&self, message: &str);

    fn flush(&self);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUiWriter;

impl UiWriter for NullUiWriter {
    fn print_assistant_start(&self) {}
    fn print_delta(&self, _text: &str) {}
    fn print_assistant_end(&self) {}
    fn print_directive(&self, _directive: &str, _auto_approved: bool) {}
    fn print_tool_result(&self, _tool: &str, _result: &ExecutionResult, _show_output: bool) {}
    fn print_status(&self, _message: &str) {}
    fn print_warning(&self, _message: &str) {}
    fn print_error(&self, _message: &str) {}
    fn print_debug(&self, _message: &str) {}
    fn flush(&self) {}
}
