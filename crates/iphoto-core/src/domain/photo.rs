//! Photo entities: the transient remote listing and the durable record
//!
//! `RemotePhoto` is a port-level DTO produced by `ICloudSession::list_photos`.
//! `PhotoRecord` is the durable row owned by the tracker; no component other
//! than the tracker mutates it.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::album::AlbumKind;

/// Composite key identifying a photo record: `(filename, album_name)`
///
/// Both parts are case-sensitive. The same filename in two different albums
/// yields two independent records (and two downloaded files).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoKey {
    /// Normalized filename
    pub filename: String,
    /// Album the photo belongs to
    pub album_name: String,
}

impl PhotoKey {
    /// Creates a new composite key
    pub fn new(filename: impl Into<String>, album_name: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            album_name: album_name.into(),
        }
    }
}

impl Display for PhotoKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.album_name, self.filename)
    }
}

/// A single photo as listed by the remote service
///
/// The `filename` here is the raw remote name; the engine normalizes it
/// before using it as a key or a path component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePhoto {
    /// Opaque identifier assigned by the cloud service
    pub remote_id: String,
    /// Raw filename as reported remotely
    pub filename: String,
    /// Size in bytes; 0 means unknown (size matching is skipped)
    pub size_bytes: u64,
    /// Name of the album this listing came from
    pub album_name: String,
    /// Kind of the source album
    pub kind: AlbumKind,
}

/// Durable record of a photo the engine has seen or downloaded
///
/// Invariants:
/// - at most one record exists per [`PhotoKey`]
/// - `deleted_locally == true` means the photo must never be redownloaded
/// - `local_relpath` is `<album_name>/<filename>` with `/` separators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Normalized filename (first half of the composite key)
    pub filename: String,
    /// Album name (second half of the composite key)
    pub album_name: String,
    /// Opaque identifier assigned by the cloud service
    pub remote_id: String,
    /// Size in bytes at download time
    pub size_bytes: u64,
    /// When the file was last written to disk
    pub downloaded_at: DateTime<Utc>,
    /// Path relative to the sync root
    pub local_relpath: String,
    /// Set when the user removed the local copy; suppresses redownload
    pub deleted_locally: bool,
    /// When a sync cycle last saw this photo in a remote listing
    pub last_checked_at: DateTime<Utc>,
}

impl PhotoRecord {
    /// Returns the composite key for this record
    pub fn key(&self) -> PhotoKey {
        PhotoKey::new(self.filename.clone(), self.album_name.clone())
    }
}
