//! Confirmation policy for directives.
//!
//! The gate starts locked: every directive needs a yes from the operator.
//! After a confirmed `request_control()` it is elevated for the rest of the
//! session and directives run without asking, except `/exit`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Asks the operator a yes/no question.
///
/// The CLI answers from stdin; tests plug in scripted answers. There is no
/// timeout: the turn waits until an answer arrives.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// Title of the question asked before the assistant may end the session.
pub const EXIT_TITLE: &str = "Exit";

/// Always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmer(pub bool);

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        debug!("Auto-answering [{}] {}: {}", title, message, self.0);
        self.0
    }
}

#[derive(Debug, Default)]
pub struct PermissionGate {
    elevated: AtomicBool,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated.load(Ordering::SeqCst)
    }

    /// Locked -> Elevated. There is no way back within a session.
    pub fn elevate(&self) {
        if !self.elevated.swap(true, Ordering::SeqCst) {
            info!("Permission gate elevated, directives no longer need confirmation");
        }
    }

    /// Allow without prompting when elevated, otherwise ask.
    pub async fn authorize(&self, confirmer: &dyn Confirmer, title: &str, message: &str) -> bool {
        if self.is_elevated() {
            debug!("Elevated, skipping confirmation for: {}", message);
            return true;
        }
        confirmer.confirm(title, message).await
    }

    pub fn state_label(&self) -> &'static str {
        if self.is_elevated() {
            "elevated"
        } else {
            "locked"
        }
    }
}

/// The confirmer handed to tool handlers: routes every question through the
/// gate, so handlers that ask for extra confirmation are bypassed too once
/// the session is elevated.
pub struct GatedConfirmer {
    gate: Arc<PermissionGate>,
    inner: Arc<dyn Confirmer>,
}

impl GatedConfirmer {
    pub fn new(gate: Arc<PermissionGate>, inner: Arc<dyn Confirmer>) -> Self {
        Self { gate, inner }
    }
}

#[async_trait]
impl Confirmer for GatedConfirmer {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        self.gate.authorize(self.inner.as_ref(), title, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingConfirmer {
        answer: bool,
        asked: AtomicUsize,
    }

    #[async_trait]
    impl Confirmer for CountingConfirmer {
        async fn confirm(&self, _title: &str, _message: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[tokio::test]
    async fn test_locked_gate_asks() {
        let gate = PermissionGate::new();
        let confirmer = CountingConfirmer {
            answer: false,
            asked: AtomicUsize::new(0),
        };
        assert!(!gate.authorize(&confirmer, "Tool", "cmd(ls)").await);
        assert_eq!(confirmer.asked.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state_label(), "locked");
    }

    #[tokio::test]
    async fn test_elevated_gate_never_prompts() {
        let gate = Arc::new(PermissionGate::new());
        gate.elevate();
        gate.elevate();

        let inner = Arc::new(CountingConfirmer {
            answer: false,
            asked: AtomicUsize::new(0),
        });
        assert!(gate.authorize(inner.as_ref(), "Tool", "cmd(ls)").await);

        let gated = GatedConfirmer::new(gate.clone(), inner.clone());
        assert!(gated.confirm("Extension", "delete file").await);
        assert_eq!(inner.asked.load(Ordering::SeqCst), 0);
        assert_eq!(gate.state_label(), "elevated");
    }

    #[tokio::test]
    async fn test_static_confirmer() {
        assert!(StaticConfirmer(true).confirm("t", "m").await);
        assert!(!StaticConfirmer(false).confirm("t", "m").await);
    }
}
