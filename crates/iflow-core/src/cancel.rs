use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Stop request shared between a running turn and the surface driving it.
///
/// Wraps a [`CancellationToken`] behind a mutex so that a fired token can be
/// swapped for a fresh one once the turn has unwound.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: Arc<Mutex<CancellationToken>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        debug!("Cancellation requested");
        self.current().cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.current().is_cancelled()
    }

    /// Reset after a cancellation has been handled.
    pub fn clear(&self) {
        let mut token = self.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Token for the in-flight stream. A later [`clear`](Self::clear) does not
    /// affect tokens already handed out.
    pub fn token(&self) -> CancellationToken {
        self.current()
    }

    fn current(&self) -> CancellationToken {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        // A poisoned lock still holds a valid token.
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}
