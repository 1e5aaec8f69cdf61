//! Integration tests for SqlitePhotoTracker
//!
//! File-backed tests use a tempdir per test for isolation; pure record
//! CRUD uses the in-memory mode.

use std::io::Write;

use tempfile::TempDir;

use iphoto_core::domain::{AlbumKind, RemotePhoto};
use iphoto_core::ports::IPhotoTracker;
use iphoto_tracker::{SqlitePhotoTracker, TRACKER_DB_FILE};

// ============================================================================
// Test helpers
// ============================================================================

fn remote_photo(filename: &str, album: &str, remote_id: &str, size: u64) -> RemotePhoto {
    RemotePhoto {
        remote_id: remote_id.to_string(),
        filename: filename.to_string(),
        size_bytes: size,
        album_name: album.to_string(),
        kind: AlbumKind::Personal,
    }
}

async fn setup() -> SqlitePhotoTracker {
    SqlitePhotoTracker::in_memory()
        .await
        .expect("in-memory tracker")
}

// ============================================================================
// Record CRUD
// ============================================================================

#[tokio::test]
async fn test_get_missing_key_returns_none() {
    let tracker = setup().await;
    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn test_record_download_then_get() {
    let tracker = setup().await;
    let photo = remote_photo("IMG_1.JPG", "Trip", "r1", 1024);

    tracker
        .record_download(&photo, "Trip/IMG_1.JPG")
        .await
        .unwrap();

    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert_eq!(record.remote_id, "r1");
    assert_eq!(record.size_bytes, 1024);
    assert_eq!(record.local_relpath, "Trip/IMG_1.JPG");
    assert!(!record.deleted_locally);
}

#[tokio::test]
async fn test_record_download_is_upsert() {
    let tracker = setup().await;
    let photo = remote_photo("IMG_1.JPG", "Trip", "r1", 1024);
    tracker
        .record_download(&photo, "Trip/IMG_1.JPG")
        .await
        .unwrap();

    // Same key, new remote id and size.
    let photo2 = remote_photo("IMG_1.JPG", "Trip", "r2", 2048);
    tracker
        .record_download(&photo2, "Trip/IMG_1.JPG")
        .await
        .unwrap();

    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert_eq!(record.remote_id, "r2");
    assert_eq!(record.size_bytes, 2048);

    // Still exactly one record for the key.
    let all = tracker.iter_album("Trip").await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_record_download_clears_deleted_flag() {
    let tracker = setup().await;
    let photo = remote_photo("IMG_1.JPG", "Trip", "r1", 1024);
    tracker
        .record_download(&photo, "Trip/IMG_1.JPG")
        .await
        .unwrap();
    tracker.mark_deleted("IMG_1.JPG", "Trip").await.unwrap();

    tracker
        .record_download(&photo, "Trip/IMG_1.JPG")
        .await
        .unwrap();

    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert!(!record.deleted_locally);
}

#[tokio::test]
async fn test_mark_deleted_preserves_other_fields() {
    let tracker = setup().await;
    let photo = remote_photo("IMG_1.JPG", "Trip", "r1", 1024);
    tracker
        .record_download(&photo, "Trip/IMG_1.JPG")
        .await
        .unwrap();

    tracker.mark_deleted("IMG_1.JPG", "Trip").await.unwrap();

    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert!(record.deleted_locally);
    assert_eq!(record.remote_id, "r1");
    assert_eq!(record.size_bytes, 1024);
    assert_eq!(record.local_relpath, "Trip/IMG_1.JPG");
}

#[tokio::test]
async fn test_touch_seen_advances_last_checked_only() {
    let tracker = setup().await;
    let photo = remote_photo("IMG_1.JPG", "Trip", "r1", 1024);
    tracker
        .record_download(&photo, "Trip/IMG_1.JPG")
        .await
        .unwrap();
    let before = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    tracker.touch_seen("IMG_1.JPG", "Trip").await.unwrap();

    let after = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert!(after.last_checked_at > before.last_checked_at);
    assert_eq!(after.downloaded_at, before.downloaded_at);
    assert_eq!(after.remote_id, before.remote_id);
}

#[tokio::test]
async fn test_composite_key_same_filename_two_albums() {
    let tracker = setup().await;
    tracker
        .record_download(&remote_photo("IMG_1.JPG", "Trip", "r1", 10), "Trip/IMG_1.JPG")
        .await
        .unwrap();
    tracker
        .record_download(&remote_photo("IMG_1.JPG", "Keep", "r2", 20), "Keep/IMG_1.JPG")
        .await
        .unwrap();

    let trip = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    let keep = tracker.get("IMG_1.JPG", "Keep").await.unwrap().unwrap();
    assert_eq!(trip.remote_id, "r1");
    assert_eq!(keep.remote_id, "r2");
}

#[tokio::test]
async fn test_iter_album_ordered_by_filename() {
    let tracker = setup().await;
    for (name, id) in [("c.jpg", "r3"), ("a.jpg", "r1"), ("b.jpg", "r2")] {
        tracker
            .record_download(
                &remote_photo(name, "Trip", id, 1),
                &format!("Trip/{}", name),
            )
            .await
            .unwrap();
    }
    // A record in another album must not leak in.
    tracker
        .record_download(&remote_photo("z.jpg", "Other", "r9", 1), "Other/z.jpg")
        .await
        .unwrap();

    let records = tracker.iter_album("Trip").await.unwrap();
    let names: Vec<_> = records.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
}

// ============================================================================
// File-backed open, backup, recovery
// ============================================================================

#[tokio::test]
async fn test_open_creates_fresh_store() {
    let dir = TempDir::new().unwrap();
    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    assert!(dir.path().join(TRACKER_DB_FILE).exists());
    assert!(tracker.get("x", "y").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reopen_preserves_records() {
    let dir = TempDir::new().unwrap();
    {
        let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
        tracker
            .record_download(&remote_photo("IMG_1.JPG", "Trip", "r1", 1024), "Trip/IMG_1.JPG")
            .await
            .unwrap();
        tracker.close().await;
    }

    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert_eq!(record.remote_id, "r1");
}

#[tokio::test]
async fn test_backup_and_rotation() {
    let dir = TempDir::new().unwrap();
    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    tracker
        .record_download(&remote_photo("IMG_1.JPG", "Trip", "r1", 1024), "Trip/IMG_1.JPG")
        .await
        .unwrap();

    let path = tracker.backup().await.unwrap();
    assert!(path.exists());
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("-deletion_tracker.db"));
    assert_eq!(path.parent().unwrap(), dir.path().join("backups"));
}

#[tokio::test]
async fn test_restore_from_backup_round_trip() {
    let dir = TempDir::new().unwrap();
    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    tracker
        .record_download(&remote_photo("IMG_1.JPG", "Trip", "r1", 1024), "Trip/IMG_1.JPG")
        .await
        .unwrap();
    tracker.backup().await.unwrap();

    // Diverge the live contents after the backup was taken.
    tracker
        .record_download(&remote_photo("IMG_2.JPG", "Trip", "r2", 2048), "Trip/IMG_2.JPG")
        .await
        .unwrap();

    let restored = tracker.restore_from_backup().await.unwrap();
    assert!(restored);

    // Contents equal the backup's contents.
    assert!(tracker.get("IMG_1.JPG", "Trip").await.unwrap().is_some());
    assert!(tracker.get("IMG_2.JPG", "Trip").await.unwrap().is_none());
}

#[tokio::test]
async fn test_restore_without_backup_returns_false() {
    let dir = TempDir::new().unwrap();
    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    assert!(!tracker.restore_from_backup().await.unwrap());
}

#[tokio::test]
async fn test_corruption_recovery_restores_backup_contents() {
    let dir = TempDir::new().unwrap();
    {
        let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
        tracker
            .record_download(&remote_photo("IMG_1.JPG", "Trip", "r1", 1024), "Trip/IMG_1.JPG")
            .await
            .unwrap();
        tracker.backup().await.unwrap();
        tracker.close().await;
    }

    // Truncate the live file to garbage.
    let db_path = dir.path().join(TRACKER_DB_FILE);
    let mut file = std::fs::File::create(&db_path).unwrap();
    file.write_all(b"corrupted!").unwrap();
    drop(file);

    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert_eq!(record.remote_id, "r1");
    assert!(!record.deleted_locally);
}

#[tokio::test]
async fn test_corruption_without_backup_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join(TRACKER_DB_FILE);
    std::fs::write(&db_path, b"not a database").unwrap();

    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    assert!(tracker.get("IMG_1.JPG", "Trip").await.unwrap().is_none());

    // The corrupt incarnation is preserved for forensics.
    assert!(dir.path().join("deletion_tracker.db.corrupt").exists());
}

#[tokio::test]
async fn test_integrity_check_passes_on_healthy_store() {
    let dir = TempDir::new().unwrap();
    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();
    tracker.integrity_check().await.unwrap();
}

// ============================================================================
// Schema migration
// ============================================================================

#[tokio::test]
async fn test_v1_schema_migrates_to_composite_key() {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join(TRACKER_DB_FILE);

    // Write a version-1 database: filename-only primary key.
    {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::raw_sql(
            "CREATE TABLE photos (
                filename        TEXT PRIMARY KEY,
                remote_id       TEXT NOT NULL,
                size_bytes      INTEGER NOT NULL DEFAULT 0,
                downloaded_at   TEXT NOT NULL,
                local_relpath   TEXT NOT NULL,
                deleted_locally INTEGER NOT NULL DEFAULT 0,
                last_checked_at TEXT NOT NULL
            );
            INSERT INTO photos VALUES
                ('IMG_1.JPG', 'r1', 1024, '2026-01-01T00:00:00+00:00',
                 'Trip/IMG_1.JPG', 1, '2026-01-01T00:00:00+00:00');
            PRAGMA user_version = 1;",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let tracker = SqlitePhotoTracker::open(dir.path()).await.unwrap();

    // Album derived from the relpath's leading segment; flags preserved.
    let record = tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert_eq!(record.remote_id, "r1");
    assert!(record.deleted_locally);
}
