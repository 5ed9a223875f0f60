//! Shutdown signalling between the process entrypoint and the orchestrator.
//!
//! The signal is a watch channel carrying `true` once shutdown was requested. The orchestrator
//! polls it before fetching each page, so the page in flight is still loaded and checkpointed
//! before the run stops.

use std::sync::Arc;

use tokio::sync::watch;

/// Receiver side of the shutdown signal.
pub type ShutdownRx = watch::Receiver<bool>;

/// Sender side of the shutdown signal. Clones signal the same receivers.
#[derive(Debug, Clone)]
pub struct ShutdownTx(Arc<watch::Sender<bool>>);

impl ShutdownTx {
    /// Requests shutdown. Every current and future receiver observes it.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }
}

/// Creates a shutdown channel in the "running" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(Arc::new(tx)), rx)
}

/// Returns `true` once shutdown has been requested on `rx`.
pub fn is_shutdown_requested(rx: &ShutdownRx) -> bool {
    *rx.borrow()
}
