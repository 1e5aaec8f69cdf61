//! Tracker backup ring
//!
//! Backups are plain file copies of the live database, taken after a WAL
//! checkpoint so the copy is self-contained. Names carry a UTC timestamp
//! so lexicographic order equals chronological order:
//!
//! ```text
//! <db_parent>/backups/YYYYMMDDTHHMMSSZ-deletion_tracker.db
//! ```
//!
//! The ring keeps the newest [`DEFAULT_BACKUP_RETENTION`] copies and
//! deletes older ones on every rotation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use iphoto_core::ports::TrackerError;

use crate::pool::TrackerPool;

/// How many backups the ring retains by default.
pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// Timestamp format used in backup file names.
const BACKUP_STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Metadata for one backup in the ring.
#[derive(Debug, Clone)]
pub struct TrackerBackup {
    /// When the backup was taken (parsed back from the file name)
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the copied file, hex-encoded
    pub source_hash: String,
    /// Location of the backup file
    pub path: PathBuf,
}

/// Creates, lists, and restores timestamped copies of the live database.
pub struct BackupManager {
    live_path: PathBuf,
    backup_dir: PathBuf,
    retention: usize,
}

impl BackupManager {
    /// Creates a manager for the given live database file.
    ///
    /// The backup directory is `backups/` next to the live file.
    pub fn new(live_path: impl Into<PathBuf>, retention: usize) -> Self {
        let live_path = live_path.into();
        let backup_dir = live_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("backups");
        Self {
            live_path,
            backup_dir,
            retention,
        }
    }

    /// Returns the backup directory path.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Takes a backup of the live file and rotates the ring.
    ///
    /// The live pool is checkpointed first so the main file contains every
    /// committed page. The copy lands under a temporary name and is renamed
    /// into place, so a concurrent reader never sees a partial backup.
    pub async fn create(&self, pool: &SqlitePool) -> Result<TrackerBackup, TrackerError> {
        sqlx::raw_sql("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(pool)
            .await
            .map_err(|e| TrackerError::WriteFailed(format!("WAL checkpoint failed: {}", e)))?;

        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            TrackerError::WriteFailed(format!(
                "Failed to create backup directory {}: {}",
                self.backup_dir.display(),
                e
            ))
        })?;

        let created_at = Utc::now();
        let file_name = format!(
            "{}-{}",
            created_at.format(BACKUP_STAMP_FORMAT),
            self.live_file_name()
        );
        let final_path = self.backup_dir.join(&file_name);
        let tmp_path = self.backup_dir.join(format!("{}.tmp", file_name));

        fs::copy(&self.live_path, &tmp_path).map_err(|e| {
            TrackerError::WriteFailed(format!(
                "Failed to copy {} to {}: {}",
                self.live_path.display(),
                tmp_path.display(),
                e
            ))
        })?;

        let source_hash = hash_file(&tmp_path)?;

        fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            TrackerError::WriteFailed(format!("Failed to finalize backup: {}", e))
        })?;

        info!(path = %final_path.display(), "Tracker backup written");

        self.rotate()?;

        Ok(TrackerBackup {
            created_at,
            source_hash,
            path: final_path,
        })
    }

    /// Lists existing backups, newest first.
    pub fn list(&self) -> Vec<PathBuf> {
        let suffix = format!("-{}", self.live_file_name());
        let mut entries: Vec<PathBuf> = match fs::read_dir(&self.backup_dir) {
            Ok(dir) => dir
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.ends_with(&suffix))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        // Timestamped names sort chronologically; newest first.
        entries.sort();
        entries.reverse();
        entries
    }

    /// Selects the newest backup that passes an integrity check.
    pub async fn newest_valid(&self) -> Option<PathBuf> {
        for candidate in self.list() {
            match Self::check_backup(&candidate).await {
                Ok(()) => return Some(candidate),
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "Skipping unusable backup");
                }
            }
        }
        None
    }

    /// Replaces the live file with the newest valid backup.
    ///
    /// Only safe while no pool holds the live file open; used during
    /// open-time recovery. Returns `false` when no usable backup exists.
    pub async fn restore_file(&self) -> Result<bool, TrackerError> {
        let Some(backup) = self.newest_valid().await else {
            return Ok(false);
        };

        let tmp_path = self.live_path.with_extension("restore.tmp");
        fs::copy(&backup, &tmp_path).map_err(|e| {
            TrackerError::WriteFailed(format!("Failed to stage restore copy: {}", e))
        })?;
        fs::rename(&tmp_path, &self.live_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            TrackerError::WriteFailed(format!("Failed to replace live database: {}", e))
        })?;

        // Leftover WAL/SHM pages belong to the corrupt incarnation.
        for ext in ["db-wal", "db-shm"] {
            let sidecar = sidecar_path(&self.live_path, ext);
            let _ = fs::remove_file(sidecar);
        }

        info!(backup = %backup.display(), "Tracker restored from backup");
        Ok(true)
    }

    /// Restores record contents into a live pool from the newest valid backup.
    ///
    /// Used when the database is already open: the backup is attached and
    /// copied table-to-table inside one transaction, which is safe under an
    /// active WAL pool where replacing the file itself would not be.
    pub async fn restore_into(&self, pool: &SqlitePool) -> Result<bool, TrackerError> {
        let Some(backup) = self.newest_valid().await else {
            return Ok(false);
        };

        let backup_str = backup.to_string_lossy().replace('\'', "''");
        let sql = format!(
            "ATTACH DATABASE '{}' AS restore_src; \
             BEGIN; \
             DELETE FROM photos; \
             INSERT INTO photos SELECT * FROM restore_src.photos; \
             COMMIT; \
             DETACH DATABASE restore_src;",
            backup_str
        );

        sqlx::raw_sql(&sql)
            .execute(pool)
            .await
            .map_err(|e| TrackerError::WriteFailed(format!("Restore from backup failed: {}", e)))?;

        info!(backup = %backup.display(), "Tracker records restored from backup");
        Ok(true)
    }

    /// Deletes backups beyond the retention count, oldest first.
    fn rotate(&self) -> Result<(), TrackerError> {
        let backups = self.list();
        for stale in backups.iter().skip(self.retention) {
            match fs::remove_file(stale) {
                Ok(()) => debug!(path = %stale.display(), "Rotated out old backup"),
                Err(e) => warn!(path = %stale.display(), error = %e, "Failed to delete old backup"),
            }
        }
        Ok(())
    }

    /// Opens a backup file read-only and runs an integrity check on it.
    async fn check_backup(path: &Path) -> Result<(), TrackerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| TrackerError::Corrupt(format!("Backup cannot be opened: {}", e)))?;

        let result = TrackerPool::integrity_check_pool(&pool).await;
        pool.close().await;
        result
    }

    fn live_file_name(&self) -> String {
        self.live_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "deletion_tracker.db".to_string())
    }
}

/// Computes the hex-encoded SHA-256 of a file.
fn hash_file(path: &Path) -> Result<String, TrackerError> {
    let data = fs::read(path)
        .map_err(|e| TrackerError::WriteFailed(format!("Failed to hash backup: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Builds the WAL/SHM sidecar path for a database file.
fn sidecar_path(live: &Path, ext: &str) -> PathBuf {
    let mut name = live
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(ext);
    live.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_names_sort_chronologically() {
        let a = "20260101T000000Z-deletion_tracker.db";
        let b = "20260102T000000Z-deletion_tracker.db";
        assert!(a < b);
    }

    #[test]
    fn test_sidecar_path() {
        let live = PathBuf::from("/state/deletion_tracker.db");
        assert_eq!(
            sidecar_path(&live, "db-wal"),
            PathBuf::from("/state/deletion_tracker.db-wal")
        );
    }
}
