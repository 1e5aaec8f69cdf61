//! Database connection pool management
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode for concurrent reads
//! - `user_version`-gated forward-only schema migrations
//! - Structural integrity checking
//! - In-memory mode for testing

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use iphoto_core::ports::TrackerError;

/// Schema version written by the current code.
///
/// Version 1 keyed photos by filename alone; version 2 introduced the
/// composite `(filename, album_name)` key.
pub const SCHEMA_VERSION: i64 = 2;

/// Current schema, created for fresh databases.
const CREATE_SCHEMA_V2: &str = "\
CREATE TABLE IF NOT EXISTS photos (
    filename        TEXT NOT NULL,
    album_name      TEXT NOT NULL,
    remote_id       TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL DEFAULT 0,
    downloaded_at   TEXT NOT NULL,
    local_relpath   TEXT NOT NULL,
    deleted_locally INTEGER NOT NULL DEFAULT 0,
    last_checked_at TEXT NOT NULL,
    PRIMARY KEY (filename, album_name)
);
CREATE INDEX IF NOT EXISTS idx_photos_album ON photos (album_name, filename);
";

/// Version 1 -> 2 migration: re-key by `(filename, album_name)`, deriving
/// the album from the leading segment of `local_relpath` where present.
const MIGRATE_V1_TO_V2: &str = "\
CREATE TABLE photos_v2 (
    filename        TEXT NOT NULL,
    album_name      TEXT NOT NULL,
    remote_id       TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL DEFAULT 0,
    downloaded_at   TEXT NOT NULL,
    local_relpath   TEXT NOT NULL,
    deleted_locally INTEGER NOT NULL DEFAULT 0,
    last_checked_at TEXT NOT NULL,
    PRIMARY KEY (filename, album_name)
);
INSERT OR IGNORE INTO photos_v2
    (filename, album_name, remote_id, size_bytes, downloaded_at,
     local_relpath, deleted_locally, last_checked_at)
SELECT
    filename,
    CASE WHEN instr(local_relpath, '/') > 0
         THEN substr(local_relpath, 1, instr(local_relpath, '/') - 1)
         ELSE '' END,
    remote_id, size_bytes, downloaded_at,
    local_relpath, deleted_locally, last_checked_at
FROM photos;
DROP TABLE photos;
ALTER TABLE photos_v2 RENAME TO photos;
CREATE INDEX IF NOT EXISTS idx_photos_album ON photos (album_name, filename);
";

/// Manages a pool of SQLite connections for the tracker database
///
/// The pool is configured with:
/// - WAL journal mode for concurrent read access
/// - 5 max connections for file-based databases
/// - 1 connection for in-memory databases (required for data persistence)
/// - 5-second busy timeout to handle write contention
pub struct TrackerPool {
    pool: SqlitePool,
}

impl TrackerPool {
    /// Creates a new pool connected to the specified file.
    ///
    /// This will:
    /// 1. Create parent directories if they don't exist
    /// 2. Create the database file if it doesn't exist
    /// 3. Enable WAL journal mode
    /// 4. Apply forward-only schema migrations
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Unavailable`] if the connection cannot be
    /// established or a migration fails.
    pub async fn open(db_path: &Path) -> Result<Self, TrackerError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrackerError::Unavailable(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                TrackerError::Unavailable(format!(
                    "Failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "Tracker pool initialized");

        Ok(Self { pool })
    }

    /// Creates an in-memory database pool for testing.
    ///
    /// Uses a single connection to ensure data persistence across queries
    /// (SQLite in-memory databases are per-connection).
    pub async fn in_memory() -> Result<Self, TrackerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                TrackerError::Unavailable(format!("Failed to create in-memory database: {}", e))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory tracker pool initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs a structural scan of the connected database.
    ///
    /// Equivalent to `PRAGMA integrity_check`; anything but a single `ok`
    /// row is reported as [`TrackerError::Corrupt`].
    pub async fn integrity_check(&self) -> Result<(), TrackerError> {
        Self::integrity_check_pool(&self.pool).await
    }

    /// Integrity check against an arbitrary pool (used for backup files).
    pub async fn integrity_check_pool(pool: &SqlitePool) -> Result<(), TrackerError> {
        let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(pool)
            .await
            .map_err(|e| TrackerError::Corrupt(format!("integrity_check failed to run: {}", e)))?;

        if verdict == "ok" {
            Ok(())
        } else {
            Err(TrackerError::Corrupt(format!(
                "integrity_check reported: {}",
                verdict
            )))
        }
    }

    /// Applies forward-only migrations based on the stored `user_version`.
    ///
    /// Each step runs in a single transaction and bumps the version pragma
    /// as its last statement, so a crash mid-migration replays cleanly.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), TrackerError> {
        let mut version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .map_err(|e| TrackerError::Unavailable(format!("Failed to read user_version: {}", e)))?;

        // Databases written before the version pragma existed carry version 0
        // but already have a photos table; treat those as version 1.
        if version == 0 && table_exists(pool, "photos").await? {
            version = 1;
        }

        if version > SCHEMA_VERSION {
            return Err(TrackerError::Unavailable(format!(
                "Database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        if version == 0 {
            let sql = format!(
                "BEGIN; {} PRAGMA user_version = {}; COMMIT;",
                CREATE_SCHEMA_V2, SCHEMA_VERSION
            );
            sqlx::raw_sql(&sql).execute(pool).await.map_err(|e| {
                TrackerError::Unavailable(format!("Failed to create schema: {}", e))
            })?;
            tracing::debug!(version = SCHEMA_VERSION, "Created fresh tracker schema");
            return Ok(());
        }

        if version == 1 {
            info!("Migrating tracker schema from v1 (filename key) to v2 (composite key)");
            let sql = format!(
                "BEGIN; {} PRAGMA user_version = {}; COMMIT;",
                MIGRATE_V1_TO_V2, SCHEMA_VERSION
            );
            sqlx::raw_sql(&sql).execute(pool).await.map_err(|e| {
                TrackerError::Unavailable(format!("Schema migration v1->v2 failed: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Returns whether a table with the given name exists.
async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool, TrackerError> {
    let count: i64 =
        sqlx::query_scalar("SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to inspect sqlite_master");
                TrackerError::Unavailable(format!("Failed to inspect schema: {}", e))
            })?;
    Ok(count > 0)
}
