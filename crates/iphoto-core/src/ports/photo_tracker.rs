//! Photo tracker port (driven/secondary port)
//!
//! The tracker is the durable map from `(filename, album)` to
//! [`PhotoRecord`]. It is the single component allowed to mutate records,
//! and the only one that knows how they are stored.
//!
//! ## Failure semantics
//!
//! - Reads fail only with [`TrackerError::Unavailable`] (fatal) or return
//!   `None` on a key miss.
//! - Writes that cannot be committed fail with [`TrackerError::WriteFailed`];
//!   callers must surface these, never swallow them.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{PhotoRecord, RemotePhoto};

/// Errors surfaced by the tracker adapter
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The store cannot be opened or created at all
    #[error("Tracker unavailable: {0}")]
    Unavailable(String),

    /// A write could not be committed
    #[error("Tracker write failed: {0}")]
    WriteFailed(String),

    /// The live file failed its structural integrity check
    #[error("Tracker integrity check failed: {0}")]
    Corrupt(String),
}

/// Port trait for the durable photo tracker
///
/// ## Implementation Notes
///
/// - `record_download` is an upsert: it clears `deleted_locally` and stamps
///   `downloaded_at` with the current time.
/// - `mark_deleted` preserves every other field for forensics.
/// - `iter_album` returns records ordered by filename ascending.
/// - `backup` rotates the backup ring; `restore_from_backup` picks the
///   newest backup whose integrity check passes.
#[async_trait::async_trait]
pub trait IPhotoTracker: Send + Sync {
    /// Looks up a record by its composite key
    async fn get(&self, filename: &str, album: &str)
        -> Result<Option<PhotoRecord>, TrackerError>;

    /// Inserts or updates the record for a completed download
    async fn record_download(
        &self,
        photo: &RemotePhoto,
        local_relpath: &str,
    ) -> Result<(), TrackerError>;

    /// Flags a record as locally deleted; the key is never downloaded again
    async fn mark_deleted(&self, filename: &str, album: &str) -> Result<(), TrackerError>;

    /// Advances `last_checked_at` without touching anything else
    async fn touch_seen(&self, filename: &str, album: &str) -> Result<(), TrackerError>;

    /// Returns all records of one album, ordered by filename
    async fn iter_album(&self, album: &str) -> Result<Vec<PhotoRecord>, TrackerError>;

    /// Copies the live file into the backup ring; returns the backup path
    async fn backup(&self) -> Result<PathBuf, TrackerError>;

    /// Replaces the live file from the newest valid backup
    ///
    /// Returns `false` when no usable backup exists.
    async fn restore_from_backup(&self) -> Result<bool, TrackerError>;

    /// Runs a structural scan of the live file
    async fn integrity_check(&self) -> Result<(), TrackerError>;
}
