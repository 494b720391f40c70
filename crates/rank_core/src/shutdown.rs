//! Shutdown coordination.
//!
//! Shared flags that let the main loop, the background timers and the host
//! bridge agree on when to stop accepting work and when final cleanup may
//! begin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Set once shutdown starts; timers and the bridge stop taking new work.
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once sessions have been released and the gateway closed.
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Stops background timers and host event intake.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new rank work will be accepted");
        }
    }

    /// Marks that every session was released and storage is closed.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ Rank sessions released - ready for final cleanup");
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_flags() {
        let state = ShutdownState::new();
        let observer = state.clone();
        assert!(!observer.is_shutdown_initiated());

        state.initiate_shutdown();
        state.initiate_shutdown();
        assert!(observer.is_shutdown_initiated());
        assert!(!observer.is_shutdown_complete());

        state.complete_shutdown();
        assert!(observer.is_shutdown_complete());
    }
}
