//! Single-instance enforcement
//!
//! An advisory `flock` on a file under the sync root. The kernel ties the
//! lock to the open file description, so a crashed process releases it
//! automatically and stale lock files never need manual cleanup. The
//! holder's PID is written into the file purely for diagnostics: when
//! acquisition fails, the error names the other process.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Default lock file name under the sync root.
pub const LOCK_FILE_NAME: &str = ".iphoto_downloader.lock";

/// Errors raised while acquiring the instance lock
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock
    #[error("Another instance is already running (pid {pid}) - lock file {path}")]
    AlreadyLocked {
        /// PID read from the lock file; "unknown" when unreadable
        pid: String,
        /// The contested lock file
        path: PathBuf,
    },

    /// The lock file could not be created or written
    #[error("Failed to acquire instance lock at {path}: {message}")]
    Io {
        /// The lock file
        path: PathBuf,
        /// Underlying error text
        message: String,
    },
}

/// Scoped advisory lock; released on drop and on process death
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquires the lock, failing fast when another process holds it.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if !try_flock(&file) {
            let mut pid = String::new();
            let _ = file.read_to_string(&mut pid);
            let pid = pid.trim().to_string();
            return Err(LockError::AlreadyLocked {
                pid: if pid.is_empty() { "unknown".to_string() } else { pid },
                path: path.to_path_buf(),
            });
        }

        // Lock held; stamp our PID for diagnostics.
        let _ = file.set_len(0);
        let _ = file.seek(SeekFrom::Start(0));
        let _ = writeln!(file, "{}", std::process::id());
        let _ = file.flush();

        info!(path = %path.display(), pid = std::process::id(), "Instance lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        unflock(&self.file);
        debug!(path = %self.path.display(), "Instance lock released");
    }
}

#[cfg(unix)]
fn try_flock(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    ret == 0
}

#[cfg(unix)]
fn unflock(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> bool {
    // Windows delivery relies on the exclusive-open semantics of the
    // platform bundle; advisory locking is a Unix concern here.
    true
}

#[cfg(not(unix))]
fn unflock(_file: &File) {}
