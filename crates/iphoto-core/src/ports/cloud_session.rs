//! Cloud session port (driven/secondary port)
//!
//! This module defines the interface to the remote photo service. The
//! concrete protocol is an adapter concern; the engine only consumes the
//! capability shapes below and switches on their enumerated outcomes.
//!
//! ## Design Notes
//!
//! - Authentication outcomes are enums, not errors: `two_factor_required`
//!   and `invalid_credentials` are ordinary results the engine branches on.
//! - `download` returns a lazy chunk stream; it is finite and not
//!   restartable mid-stream. A short read surfaces as [`CloudError::Truncated`].
//! - The engine never issues a deletion through this port; the trait has
//!   no deleting operation by construction.

use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::domain::{Album, RemotePhoto};

/// Errors surfaced by the cloud adapter
#[derive(Debug, Error)]
pub enum CloudError {
    /// The remote service rejected or failed the request
    #[error("Cloud service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The requested item does not exist remotely
    #[error("Remote item not found: {0}")]
    NotFound(String),

    /// A download ended before the advertised byte count
    #[error("Download truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the remote listing advertised
        expected: u64,
        /// Bytes actually received
        actual: u64,
    },
}

/// Result of a password authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Fully authenticated; a trusted session is active
    Ok,
    /// Credentials accepted but a second factor is required
    TwoFactorRequired,
    /// Username or password rejected
    InvalidCredentials,
    /// The service could not be reached or answered 5xx
    ServiceUnavailable,
}

/// Result of asking the service to (re)send a 2FA code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A code was dispatched to the user's trusted devices
    Ok,
    /// The service refused; too many requests
    RateLimited,
    /// The service could not be reached or answered 5xx
    ServiceUnavailable,
}

/// Result of submitting a 2FA code for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Code accepted; the session is now second-factor authenticated
    Ok,
    /// Code rejected
    CodeInvalid,
    /// The service could not be reached or answered 5xx
    ServiceUnavailable,
}

/// Lazy sequence of downloaded byte chunks
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, CloudError>>;

/// Port trait for the remote photo library
///
/// ## Implementation Notes
///
/// - `authenticate` must load any persisted trusted-session blob first and
///   return [`AuthOutcome::Ok`] without prompting when it is still valid.
/// - `trust_session` is best-effort: failures are logged, not fatal.
/// - `list_photos` is restartable per call; each invocation re-enumerates
///   the album from the beginning.
#[async_trait::async_trait]
pub trait ICloudSession: Send + Sync {
    /// Authenticates with the stored credentials
    async fn authenticate(&self) -> Result<AuthOutcome, CloudError>;

    /// Asks the service to push a fresh 2FA code to the user's devices
    async fn request_2fa(&self) -> Result<RequestOutcome, CloudError>;

    /// Submits a 6-digit code for verification
    async fn verify_2fa(&self, code: &str) -> Result<VerifyOutcome, CloudError>;

    /// Marks the current session as trusted so future runs skip 2FA
    async fn trust_session(&self) -> Result<(), CloudError>;

    /// Enumerates all albums of both kinds
    async fn list_albums(&self) -> Result<Vec<Album>, CloudError>;

    /// Enumerates the photos of one album
    async fn list_photos(&self, album: &Album) -> Result<Vec<RemotePhoto>, CloudError>;

    /// Opens a byte stream for a photo's content
    async fn download(&self, remote_id: &str) -> Result<ByteStream, CloudError>;
}
