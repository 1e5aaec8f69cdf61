//! Cooperative control signals
//!
//! The engine is single-threaded and cooperative: it observes these flags
//! between photos and between albums, never mid-download. Shutdown is a
//! [`CancellationToken`] set by signal handlers; the maintenance flag is
//! set by the scheduler's ticker and consumed (swap-to-false) by whoever
//! services it first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Shared flags observed at the engine's per-photo checkpoints
#[derive(Clone)]
pub struct SyncSignals {
    shutdown: CancellationToken,
    maintenance_due: Arc<AtomicBool>,
}

impl SyncSignals {
    /// Creates fresh, unset signals
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            maintenance_due: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests a graceful shutdown; the current photo finishes first
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Future that resolves when shutdown is requested
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    /// Flags that a maintenance run is due
    pub fn request_maintenance(&self) {
        self.maintenance_due.store(true, Ordering::Release);
    }

    /// Consumes the maintenance flag; returns true at most once per request
    pub fn take_maintenance(&self) -> bool {
        self.maintenance_due.swap(false, Ordering::AcqRel)
    }
}

impl Default for SyncSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        let signals = SyncSignals::new();
        assert!(!signals.is_shutdown());
        signals.request_shutdown();
        assert!(signals.is_shutdown());

        // Clones observe the same token.
        let clone = signals.clone();
        assert!(clone.is_shutdown());
    }

    #[test]
    fn test_maintenance_is_consumed_once() {
        let signals = SyncSignals::new();
        assert!(!signals.take_maintenance());
        signals.request_maintenance();
        assert!(signals.take_maintenance());
        assert!(!signals.take_maintenance());
    }
}
