/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The last reply carried no directive.
    Completed,
    /// Stopped by the operator or by a `/stop` directive. The unfinished
    /// reply was discarded.
    Cancelled,
    /// The model sent nothing; nothing was appended.
    EmptyReply,
    /// The operator confirmed an `/exit` directive.
    ExitRequested,
}

/// Result of one [`Agent::send`](crate::Agent::send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResult {
    /// The last complete assistant reply of the turn, empty if there was none.
    pub response: String,
    pub outcome: TurnOutcome,
    /// Directives run during the turn, declined ones included.
    pub directives_executed: usize,
}

impl TurnResult {
    pub fn new(response: String, outcome: TurnOutcome, directives_executed: usize) -> Self {
        Self {
            response,
            outcome,
            directives_executed,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.outcome == TurnOutcome::ExitRequested
    }
}
