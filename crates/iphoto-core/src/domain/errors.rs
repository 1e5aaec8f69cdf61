//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including filename validation and album filter resolution.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Filename reduces to nothing after normalization
    #[error("Filename is empty after normalization: {0:?}")]
    UnusableFilename(String),

    /// Album name reduces to nothing after normalization
    #[error("Album name is empty after normalization: {0:?}")]
    UnusableAlbumName(String),

    /// An album named in an allowlist was not discovered remotely
    #[error("Configured album not found in the remote library: {0}")]
    ConfiguredAlbumMissing(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
