//! SQLite implementation of IPhotoTracker
//!
//! Concrete store behind the tracker port. Handles row mapping, SQL
//! construction, and the open-time recovery ladder:
//!
//! 1. open + integrity check
//! 2. on failure, restore the newest valid backup and reopen
//! 3. failing that, move the corrupt file aside and start fresh
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                               |
//! |-----------------|----------|----------------------------------------|
//! | filename/album  | TEXT     | stored verbatim, case-sensitive        |
//! | size_bytes      | INTEGER  | `i64`, never negative                  |
//! | DateTime<Utc>   | TEXT     | RFC 3339 via `to_rfc3339()`            |
//! | deleted_locally | INTEGER  | 0/1                                    |

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};

use iphoto_core::domain::{PhotoRecord, RemotePhoto};
use iphoto_core::ports::{IPhotoTracker, TrackerError};

use crate::backup::{BackupManager, DEFAULT_BACKUP_RETENTION};
use crate::pool::TrackerPool;

/// File name of the live tracker database.
pub const TRACKER_DB_FILE: &str = "deletion_tracker.db";

/// SQLite-backed photo tracker
///
/// Owns the live connection pool and the backup ring. All writes go
/// through the pool; serialization is provided by SQLite itself (WAL,
/// busy timeout) so readers always observe post-commit state.
pub struct SqlitePhotoTracker {
    pool: TrackerPool,
    backups: BackupManager,
}

impl SqlitePhotoTracker {
    /// Opens or creates the tracker under `db_parent_dir`.
    ///
    /// Runs the integrity check and, on corruption, walks the recovery
    /// ladder described at module level. Fails with
    /// [`TrackerError::Unavailable`] only when a fresh store cannot be
    /// created either (permissions, disk full).
    pub async fn open(db_parent_dir: &Path) -> Result<Self, TrackerError> {
        let db_path = db_parent_dir.join(TRACKER_DB_FILE);
        let backups = BackupManager::new(&db_path, DEFAULT_BACKUP_RETENTION);

        match Self::try_open(&db_path).await {
            Ok(pool) => {
                return Ok(Self { pool, backups });
            }
            Err(e) => {
                warn!(path = %db_path.display(), error = %e, "Tracker failed to open cleanly");
            }
        }

        // The live file is unusable. Prefer the newest valid backup.
        if backups.restore_file().await? {
            match Self::try_open(&db_path).await {
                Ok(pool) => {
                    info!("Tracker recovered from backup");
                    return Ok(Self { pool, backups });
                }
                Err(e) => {
                    warn!(error = %e, "Restored backup failed to open");
                }
            }
        }

        // No usable backup: preserve the corrupt file for forensics and
        // start over with an empty store.
        let corrupt_path = db_path.with_extension("db.corrupt");
        if db_path.exists() {
            std::fs::rename(&db_path, &corrupt_path).map_err(|e| {
                TrackerError::Unavailable(format!(
                    "Cannot move corrupt database aside ({} -> {}): {}",
                    db_path.display(),
                    corrupt_path.display(),
                    e
                ))
            })?;
            warn!(
                corrupt = %corrupt_path.display(),
                "No valid backup; corrupt tracker moved aside, starting fresh"
            );
        }

        // WAL/SHM pages of the corrupt incarnation must not attach to the
        // fresh store.
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.clone().into_os_string();
            sidecar.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(sidecar));
        }

        let pool = Self::try_open(&db_path).await?;
        info!(path = %db_path.display(), "Created fresh tracker store");
        Ok(Self { pool, backups })
    }

    /// Opens an in-memory tracker for tests.
    pub async fn in_memory() -> Result<Self, TrackerError> {
        let pool = TrackerPool::in_memory().await?;
        // Backups of an in-memory store are meaningless; point the manager
        // at a path that never exists so backup() fails loudly if called.
        let backups = BackupManager::new(PathBuf::from(":memory:"), DEFAULT_BACKUP_RETENTION);
        Ok(Self { pool, backups })
    }

    /// Pool + integrity check, no recovery.
    async fn try_open(db_path: &Path) -> Result<TrackerPool, TrackerError> {
        let pool = TrackerPool::open(db_path).await?;
        pool.integrity_check().await?;
        Ok(pool)
    }

    /// Closes the pool, flushing outstanding writes.
    ///
    /// The pool also closes when dropped; this exists for explicit
    /// shutdown paths that want to sequence the close before releasing
    /// the instance lock.
    pub async fn close(&self) {
        self.pool.pool().close().await;
    }
}

/// Maps a database row to a [`PhotoRecord`].
fn record_from_row(row: &SqliteRow) -> Result<PhotoRecord, TrackerError> {
    let downloaded_at_str: String = row.get("downloaded_at");
    let last_checked_at_str: String = row.get("last_checked_at");
    let size_bytes: i64 = row.get("size_bytes");
    let deleted_locally: i64 = row.get("deleted_locally");

    Ok(PhotoRecord {
        filename: row.get("filename"),
        album_name: row.get("album_name"),
        remote_id: row.get("remote_id"),
        size_bytes: size_bytes.max(0) as u64,
        downloaded_at: parse_datetime(&downloaded_at_str)?,
        local_relpath: row.get("local_relpath"),
        deleted_locally: deleted_locally != 0,
        last_checked_at: parse_datetime(&last_checked_at_str)?,
    })
}

/// Parses an RFC 3339 timestamp stored as TEXT.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, TrackerError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrackerError::Corrupt(format!("Unparseable timestamp '{}': {}", s, e)))
}

#[async_trait::async_trait]
impl IPhotoTracker for SqlitePhotoTracker {
    async fn get(
        &self,
        filename: &str,
        album: &str,
    ) -> Result<Option<PhotoRecord>, TrackerError> {
        let row = sqlx::query(
            "SELECT filename, album_name, remote_id, size_bytes, downloaded_at, \
             local_relpath, deleted_locally, last_checked_at \
             FROM photos WHERE filename = ? AND album_name = ?",
        )
        .bind(filename)
        .bind(album)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| TrackerError::Unavailable(format!("Tracker read failed: {}", e)))?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn record_download(
        &self,
        photo: &RemotePhoto,
        local_relpath: &str,
    ) -> Result<(), TrackerError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO photos \
             (filename, album_name, remote_id, size_bytes, downloaded_at, \
              local_relpath, deleted_locally, last_checked_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?) \
             ON CONFLICT (filename, album_name) DO UPDATE SET \
               remote_id = excluded.remote_id, \
               size_bytes = excluded.size_bytes, \
               downloaded_at = excluded.downloaded_at, \
               local_relpath = excluded.local_relpath, \
               deleted_locally = 0, \
               last_checked_at = excluded.last_checked_at",
        )
        .bind(&photo.filename)
        .bind(&photo.album_name)
        .bind(&photo.remote_id)
        .bind(photo.size_bytes as i64)
        .bind(&now)
        .bind(local_relpath)
        .bind(&now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| TrackerError::WriteFailed(format!("record_download failed: {}", e)))?;

        debug!(
            photo = %photo.filename,
            album = %photo.album_name,
            "Recorded download"
        );
        Ok(())
    }

    async fn mark_deleted(&self, filename: &str, album: &str) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE photos SET deleted_locally = 1 WHERE filename = ? AND album_name = ?",
        )
        .bind(filename)
        .bind(album)
        .execute(self.pool.pool())
        .await
        .map_err(|e| TrackerError::WriteFailed(format!("mark_deleted failed: {}", e)))?;

        if result.rows_affected() == 0 {
            warn!(photo = filename, album = album, "mark_deleted on unknown key");
        }
        Ok(())
    }

    async fn touch_seen(&self, filename: &str, album: &str) -> Result<(), TrackerError> {
        sqlx::query(
            "UPDATE photos SET last_checked_at = ? WHERE filename = ? AND album_name = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(filename)
        .bind(album)
        .execute(self.pool.pool())
        .await
        .map_err(|e| TrackerError::WriteFailed(format!("touch_seen failed: {}", e)))?;
        Ok(())
    }

    async fn iter_album(&self, album: &str) -> Result<Vec<PhotoRecord>, TrackerError> {
        let rows = sqlx::query(
            "SELECT filename, album_name, remote_id, size_bytes, downloaded_at, \
             local_relpath, deleted_locally, last_checked_at \
             FROM photos WHERE album_name = ? ORDER BY filename ASC",
        )
        .bind(album)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| TrackerError::Unavailable(format!("Tracker read failed: {}", e)))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn backup(&self) -> Result<PathBuf, TrackerError> {
        let backup = self.backups.create(self.pool.pool()).await?;
        Ok(backup.path)
    }

    async fn restore_from_backup(&self) -> Result<bool, TrackerError> {
        self.backups.restore_into(self.pool.pool()).await
    }

    async fn integrity_check(&self) -> Result<(), TrackerError> {
        self.pool.integrity_check().await
    }
}
