//! iPhoto Tracker - Durable download state
//!
//! SQLite-backed store mapping `(filename, album)` to download records:
//! - WAL-mode connection pool with schema versioning
//! - Forward-only migrations (filename key -> composite key)
//! - Integrity checking, timestamped backup ring, restore-on-corruption

mod backup;
mod pool;
mod repository;

pub use backup::{BackupManager, TrackerBackup, DEFAULT_BACKUP_RETENTION};
pub use pool::TrackerPool;
pub use repository::{SqlitePhotoTracker, TRACKER_DB_FILE};
