//! Persisted 2FA back-off
//!
//! When a cycle fails because the second factor was never completed, the
//! scheduler waits exponentially longer before the next attempt: 8 minutes,
//! doubling per consecutive failure, capped at 2 days. The counter lives in
//! a JSON file in the OS temp directory so a restart does not reset it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// File name in the OS temp directory.
pub const BACKOFF_FILE_NAME: &str = "iphoto_downloader_backoff.json";

/// First wait after a 2FA failure.
const BASE_DELAY: Duration = Duration::from_secs(8 * 60);

/// Ceiling on the wait: 2 days.
const MAX_DELAY: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackoffState {
    consecutive_two_factor_failures: u32,
}

/// Exponential back-off counter with JSON persistence
#[derive(Debug)]
pub struct TwoFactorBackoff {
    path: PathBuf,
    state: BackoffState,
}

impl TwoFactorBackoff {
    /// Loads the counter from the OS temp directory.
    pub fn load_default() -> Self {
        Self::load_from(std::env::temp_dir().join(BACKOFF_FILE_NAME))
    }

    /// Loads the counter from an explicit path; a missing or unreadable
    /// file starts the count at zero.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Unreadable back-off file, resetting");
                BackoffState::default()
            }),
            Err(_) => BackoffState::default(),
        };
        Self { path, state }
    }

    /// Number of consecutive 2FA failures on record.
    pub fn failures(&self) -> u32 {
        self.state.consecutive_two_factor_failures
    }

    /// Records one more failure and persists the counter.
    pub fn record_failure(&mut self) {
        self.state.consecutive_two_factor_failures =
            self.state.consecutive_two_factor_failures.saturating_add(1);
        self.persist();
    }

    /// Clears the counter after any successful authentication.
    pub fn reset(&mut self) {
        if self.state.consecutive_two_factor_failures != 0 {
            self.state.consecutive_two_factor_failures = 0;
            self.persist();
        }
    }

    /// The wait before the next attempt: `8 min * 2^(n-1)`, capped at 2 days.
    ///
    /// Zero failures means no back-off.
    pub fn current_delay(&self) -> Duration {
        delay_for(self.state.consecutive_two_factor_failures)
    }

    /// The back-off file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) {
        match serde_json::to_string(&self.state) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "Failed to persist back-off state");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize back-off state"),
        }
        debug!(
            failures = self.state.consecutive_two_factor_failures,
            "Back-off state persisted"
        );
    }
}

/// Pure delay computation, saturating at the ceiling.
fn delay_for(failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    // 2^(n-1) overflows quickly; anything past the ceiling is clamped anyway.
    let exponent = failures - 1;
    let multiplier = if exponent >= 32 {
        u64::MAX
    } else {
        1u64 << exponent
    };
    let secs = BASE_DELAY.as_secs().saturating_mul(multiplier);
    Duration::from_secs(secs.min(MAX_DELAY.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(delay_for(0), Duration::ZERO);
    }

    #[test]
    fn test_first_failure_waits_eight_minutes() {
        assert_eq!(delay_for(1), Duration::from_secs(480));
    }

    #[test]
    fn test_delay_doubles() {
        assert_eq!(delay_for(2), Duration::from_secs(960));
        assert_eq!(delay_for(3), Duration::from_secs(1920));
    }

    #[test]
    fn test_ceiling_is_exactly_two_days() {
        // After 20 consecutive failures the wait is exactly 2 days, not more.
        assert_eq!(delay_for(20), Duration::from_secs(172_800));
        assert_eq!(delay_for(64), Duration::from_secs(172_800));
    }

    #[test]
    fn test_counter_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BACKOFF_FILE_NAME);

        let mut backoff = TwoFactorBackoff::load_from(&path);
        backoff.record_failure();
        backoff.record_failure();
        assert_eq!(backoff.failures(), 2);

        let reloaded = TwoFactorBackoff::load_from(&path);
        assert_eq!(reloaded.failures(), 2);
        assert_eq!(reloaded.current_delay(), Duration::from_secs(960));
    }

    #[test]
    fn test_reset_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BACKOFF_FILE_NAME);

        let mut backoff = TwoFactorBackoff::load_from(&path);
        backoff.record_failure();
        backoff.reset();

        let reloaded = TwoFactorBackoff::load_from(&path);
        assert_eq!(reloaded.failures(), 0);
        assert_eq!(reloaded.current_delay(), Duration::ZERO);
    }

    #[test]
    fn test_corrupt_file_resets_to_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(BACKOFF_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();

        let backoff = TwoFactorBackoff::load_from(&path);
        assert_eq!(backoff.failures(), 0);
    }
}
