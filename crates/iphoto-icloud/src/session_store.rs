//! Trusted-session blob persistence
//!
//! The session blob is opaque to the rest of the system: whatever tokens
//! the authentication exchange hands back are serialized as JSON into a
//! per-user file. The only contracts are owner-only file permissions and
//! the ability to bootstrap a trusted session on the next start.
//!
//! Layout: `<user_state_dir>/iphoto_downloader/sessions/<username>.json`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Tokens captured during authentication
///
/// Fields are whatever the service handed us; none of them are
/// interpreted outside the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionBlob {
    /// Session token returned by the sign-in exchange
    pub session_token: Option<String>,
    /// Trust token returned after a completed 2FA exchange
    pub trust_token: Option<String>,
    /// Opaque session id header value
    pub session_id: Option<String>,
    /// Opaque scnt header value
    pub scnt: Option<String>,
}

impl SessionBlob {
    /// Whether this blob carries a trust token from a prior 2FA exchange
    pub fn is_trusted(&self) -> bool {
        self.trust_token.is_some()
    }
}

/// Stores and retrieves session blobs under a per-user directory
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Creates a store rooted at the platform default location.
    pub fn default_location() -> Self {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("iphoto_downloader")
            .join("sessions");
        Self { dir }
    }

    /// Creates a store rooted at an explicit directory (tests).
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the blobs live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves the blob for the given user with owner-only permissions.
    pub fn save(&self, username: &str, blob: &SessionBlob) -> Result<()> {
        fs::create_dir_all(&self.dir).context("Failed to create session directory")?;
        restrict_dir(&self.dir)?;

        let path = self.blob_path(username);
        let json = serde_json::to_string_pretty(blob).context("Failed to serialize session")?;
        fs::write(&path, json).context("Failed to write session blob")?;
        restrict_file(&path)?;

        debug!(path = %path.display(), "Session blob saved");
        Ok(())
    }

    /// Loads the blob for the given user, if one exists.
    pub fn load(&self, username: &str) -> Result<Option<SessionBlob>> {
        let path = self.blob_path(username);
        match fs::read_to_string(&path) {
            Ok(json) => {
                let blob: SessionBlob =
                    serde_json::from_str(&json).context("Failed to parse session blob")?;
                debug!(path = %path.display(), "Session blob loaded");
                Ok(Some(blob))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read session blob"),
        }
    }

    /// Removes the stored blob for the given user.
    pub fn clear(&self, username: &str) -> Result<()> {
        let path = self.blob_path(username);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Session blob cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session blob"),
        }
    }

    fn blob_path(&self, username: &str) -> PathBuf {
        // Usernames are email addresses; keep the file name tame.
        let safe: String = username
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '@' || c == '.' || c == '-' {
                c
            } else {
                '_'
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .context("Failed to restrict session file permissions")
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .context("Failed to restrict session directory permissions")
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}
