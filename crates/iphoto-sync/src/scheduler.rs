//! Execution scheduling: single vs continuous
//!
//! The scheduler owns the cadence around the engine:
//! - waits `SYNC_INTERVAL` between successful cycles
//! - applies the persisted exponential back-off after 2FA failures
//! - ticks the maintenance flag every `MAINTENANCE_INTERVAL`
//! - watches the shutdown signal and exits cleanly between waits
//!
//! Failure routing follows the error taxonomy: tracker and filesystem
//! failures emit one fatal notification and retry next interval; invalid
//! credentials, album-configuration errors, and lock contention are not
//! retryable and stop the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use iphoto_core::config::ExecutionMode;
use iphoto_core::ports::notifier::NotifyKind;

use crate::backoff::TwoFactorBackoff;
use crate::engine::{CycleReport, EngineError, SyncEngine};
use crate::signals::SyncSignals;

/// Wait between successful cycles in continuous mode.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Cadence of tracker maintenance (backup + integrity check).
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on one cycle before it is abandoned.
const CYCLE_WATCHDOG: Duration = Duration::from_secs(4 * 60 * 60);

/// Drives sync cycles according to the configured execution mode
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    mode: ExecutionMode,
    signals: SyncSignals,
    backoff: TwoFactorBackoff,
}

impl Scheduler {
    /// Creates a scheduler over an engine.
    pub fn new(
        engine: Arc<SyncEngine>,
        mode: ExecutionMode,
        signals: SyncSignals,
        backoff: TwoFactorBackoff,
    ) -> Self {
        Self {
            engine,
            mode,
            signals,
            backoff,
        }
    }

    /// Runs to completion: one cycle in single mode, until shutdown in
    /// continuous mode.
    pub async fn run(mut self) -> Result<(), EngineError> {
        match self.mode {
            ExecutionMode::Single => self.run_single().await,
            ExecutionMode::Continuous => self.run_continuous().await,
        }
    }

    async fn run_single(&mut self) -> Result<(), EngineError> {
        let report = self.guarded_cycle().await?;
        self.backoff.reset();

        if report.downloaded > 0 {
            self.engine
                .notify(
                    NotifyKind::Info,
                    "Photo sync finished",
                    &format!("Downloaded {} new photos", report.downloaded),
                    None,
                )
                .await;
        }
        Ok(())
    }

    async fn run_continuous(&mut self) -> Result<(), EngineError> {
        let ticker = self.spawn_maintenance_ticker();

        let result = loop {
            if self.signals.is_shutdown() {
                break Ok(());
            }

            // Maintenance that came due between cycles.
            if self.signals.take_maintenance() {
                if let Err(e) = self.engine.run_maintenance().await {
                    warn!(error = %e, "Maintenance run failed");
                }
            }

            let wait = match self.guarded_cycle().await {
                Ok(report) => {
                    self.backoff.reset();
                    if report.interrupted {
                        break Ok(());
                    }
                    SYNC_INTERVAL
                }
                Err(EngineError::TwoFactorIncomplete(reason)) => {
                    self.backoff.record_failure();
                    let delay = self.backoff.current_delay();
                    warn!(
                        %reason,
                        failures = self.backoff.failures(),
                        delay_secs = delay.as_secs(),
                        "2FA incomplete, backing off"
                    );
                    delay
                }
                Err(e @ (EngineError::Tracker(_) | EngineError::Filesystem(_))) => {
                    error!(error = %e, "Cycle aborted");
                    self.engine
                        .notify(NotifyKind::Fatal, "Photo sync failed", &e.to_string(), None)
                        .await;
                    SYNC_INTERVAL
                }
                Err(EngineError::Cloud(reason)) => {
                    warn!(%reason, "Cloud unavailable, retrying next interval");
                    SYNC_INTERVAL
                }
                Err(e) => {
                    // Invalid credentials, missing configured albums, and
                    // lock contention do not fix themselves; stop.
                    error!(error = %e, "Unrecoverable cycle failure, stopping scheduler");
                    break Err(e);
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.signals.shutdown_requested() => break Ok(()),
            }
        };

        ticker.abort();
        info!("Scheduler stopped");
        result
    }

    /// One cycle under the 4-hour watchdog.
    async fn guarded_cycle(&self) -> Result<CycleReport, EngineError> {
        match tokio::time::timeout(CYCLE_WATCHDOG, self.engine.run_cycle(&self.signals)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    watchdog_secs = CYCLE_WATCHDOG.as_secs(),
                    "Cycle exceeded the watchdog, abandoning"
                );
                Err(EngineError::Cloud("cycle watchdog exceeded".to_string()))
            }
        }
    }

    /// Background task that raises the maintenance flag on a fixed cadence.
    fn spawn_maintenance_ticker(&self) -> tokio::task::JoinHandle<()> {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            // The first tick fires immediately; maintenance right after
            // start is pointless since every cycle begins with a backup.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("Maintenance due");
                        signals.request_maintenance();
                    }
                    _ = signals.shutdown_requested() => break,
                }
            }
        })
    }
}
