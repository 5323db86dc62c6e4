//! Shutdown coordination using cancellation tokens.
//!
//! Two levels are tracked. A graceful shutdown asks subsystems to drain
//! their queues and stop. An abort stops them after (or during) the item
//! they are working on and discards what is still queued. An abort always
//! implies a graceful shutdown as well.

use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Global shutdown controller instance
static GLOBAL_SHUTDOWN: OnceLock<ShutdownController> = OnceLock::new();

/// Controller for coordinating shutdown across tasks.
#[derive(Clone)]
pub struct ShutdownController {
    graceful: CancellationToken,
    abort: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            graceful: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    /// Ask everything to finish queued work and stop.
    pub fn trigger(&self) {
        self.graceful.cancel();
    }

    /// Stop as soon as possible, dropping queued work.
    pub fn abort(&self) {
        self.graceful.cancel();
        self.abort.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Completes when a graceful shutdown (or an abort) is requested.
    /// Use this in `tokio::select!` to check for shutdown.
    pub async fn cancelled(&self) {
        self.graceful.cancelled().await
    }

    /// Completes when an abort is requested.
    pub async fn aborted(&self) {
        self.abort.cancelled().await
    }

    /// Create a child of the abort token, which can also be cancelled
    /// independently to abort just one component.
    pub fn abort_child(&self) -> CancellationToken {
        self.abort.child_token()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Set the global shutdown controller.
/// Should be called once at startup.
pub fn set_global(controller: ShutdownController) {
    let _ = GLOBAL_SHUTDOWN.set(controller);
}

/// Get the global shutdown controller.
/// Returns a default (never-triggered) controller if not set.
pub fn global() -> ShutdownController {
    GLOBAL_SHUTDOWN
        .get()
        .cloned()
        .unwrap_or_else(ShutdownController::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_implies_graceful() {
        let s = ShutdownController::new();
        assert!(!s.is_triggered());
        s.abort();
        assert!(s.is_triggered());
        assert!(s.is_aborted());
    }

    #[test]
    fn graceful_does_not_abort_children() {
        let s = ShutdownController::new();
        let child = s.abort_child();
        s.trigger();
        assert!(!child.is_cancelled());
        s.abort();
        assert!(child.is_cancelled());
    }
}
