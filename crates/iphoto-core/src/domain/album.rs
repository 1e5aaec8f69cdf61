//! Album entity
//!
//! Albums are transient: the engine rebuilds the album list from the cloud
//! on every cycle and never persists them.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Whether an album is owned by the user or shared with them
///
/// The ordering (`Personal < Shared`) is load-bearing: the engine processes
/// albums in `(kind, name)` ascending order to keep cycles deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumKind {
    /// Owned by the authenticated user
    Personal,
    /// Shared with the authenticated user by a third party
    Shared,
}

impl Display for AlbumKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlbumKind::Personal => "personal",
            AlbumKind::Shared => "shared",
        };
        write!(f, "{}", s)
    }
}

/// A user-named photo collection in the remote library
///
/// Rebuilt from `ICloudSession::list_albums` each cycle. `item_count` is
/// advisory only; the authoritative listing comes from `list_photos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    /// Album name, unique within its kind; matching is case-sensitive
    pub name: String,
    /// Personal or shared
    pub kind: AlbumKind,
    /// Advisory item count reported by the remote service
    pub item_count: u64,
}

impl Album {
    /// Creates a new album descriptor
    pub fn new(name: impl Into<String>, kind: AlbumKind, item_count: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            item_count,
        }
    }

    /// Sort key used for deterministic per-cycle ordering
    pub fn sort_key(&self) -> (AlbumKind, &str) {
        (self.kind, self.name.as_str())
    }
}

impl Display for Album {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}
