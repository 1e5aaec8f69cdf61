//! Notifier port (driven/secondary port)
//!
//! One-way out-of-band message delivery: 2FA prompts, success
//! confirmations, and fatal-error reports. Delivery is fire-and-forget
//! from the engine's point of view; retries are the caller's policy and
//! the engine chooses not to retry.

use std::fmt::{self, Display, Formatter};

use thiserror::Error;

/// What a notification is about; adapters map this to urgency/priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    /// Routine information (cycle finished, downloads completed)
    Info,
    /// The sync is blocked waiting for a 2FA code
    AuthRequired,
    /// 2FA completed and the session is trusted
    AuthSuccess,
    /// The cycle aborted uncleanly
    Fatal,
}

impl Display for NotifyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotifyKind::Info => "info",
            NotifyKind::AuthRequired => "auth_required",
            NotifyKind::AuthSuccess => "auth_success",
            NotifyKind::Fatal => "fatal",
        };
        write!(f, "{}", s)
    }
}

/// Errors surfaced by the notifier adapter
///
/// Messages must never contain API tokens or user keys; adapters redact
/// before constructing these.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The upstream push service answered non-2xx
    #[error("Push service rejected the message: HTTP {status}")]
    Upstream {
        /// HTTP status returned by the push service
        status: u16,
    },

    /// The request could not be delivered within the bounded timeout
    #[error("Push delivery failed: {0}")]
    Transport(String),
}

/// Port trait for out-of-band notifications
#[async_trait::async_trait]
pub trait INotifier: Send + Sync {
    /// Sends one message; blocks at most the adapter's bounded timeout
    ///
    /// `url`, when present, is a deep link to the 2FA web interface.
    async fn notify(
        &self,
        kind: NotifyKind,
        title: &str,
        body: &str,
        url: Option<&str>,
    ) -> Result<(), NotifyError>;
}
