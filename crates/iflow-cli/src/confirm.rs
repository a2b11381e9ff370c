use async_trait::async_trait;
use iflow_core::{Confirmer, EXIT_TITLE};
use std::io::{self, BufRead, Write};
use tracing::{debug, warn};

/// Asks on the terminal. The question blocks the turn until answered.
pub struct ConsoleConfirmer;

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        let prompt = format!("\x1b[1;33m[{}]\x1b[0m {} [y/N] ", title, message);
        match read_line(prompt).await {
            Ok(Some(answer)) => {
                let allowed = is_yes(&answer);
                debug!("Confirmation '{}': {}", title, allowed);
                allowed
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Could not read confirmation: {}", e);
                false
            }
        }
    }
}

/// `--yes`: approves everything except the assistant asking to quit, which
/// still goes to `exit`.
pub struct AssumeYes<C> {
    exit: C,
}

impl<C: Confirmer> AssumeYes<C> {
    pub fn new(exit: C) -> Self {
        Self { exit }
    }
}

#[async_trait]
impl<C: Confirmer> Confirmer for AssumeYes<C> {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        if title == EXIT_TITLE {
            return self.exit.confirm(title, message).await;
        }
        debug!("Assuming yes for [{}] {}", title, message);
        true
    }
}

/// Print `prompt` and read one line from stdin off the async runtime.
/// `None` at end of input.
pub async fn read_line(prompt: String) -> io::Result<Option<String>> {
    tokio::task::spawn_blocking(move || {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        Ok((read > 0).then(|| line.trim().to_string()))
    })
    .await
    .map_err(io::Error::other)?
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
