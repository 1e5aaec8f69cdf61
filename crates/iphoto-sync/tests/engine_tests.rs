//! End-to-end engine scenarios over fake adapters
//!
//! The cloud session and notifier are in-memory fakes; the tracker is the
//! real SQLite store in a tempdir, so every cycle exercises the full
//! backup/record path.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream;
use tempfile::TempDir;

use iphoto_core::config::{Config, PortRange};
use iphoto_core::domain::{Album, AlbumKind, DomainError, RemotePhoto};
use iphoto_core::ports::cloud_session::{
    AuthOutcome, ByteStream, CloudError, ICloudSession, RequestOutcome, VerifyOutcome,
};
use iphoto_core::ports::notifier::{INotifier, NotifyError, NotifyKind};
use iphoto_core::ports::photo_tracker::IPhotoTracker;
use iphoto_sync::{EngineError, SyncEngine, SyncSignals};
use iphoto_tracker::SqlitePhotoTracker;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeCloud {
    albums: Vec<Album>,
    photos: HashMap<String, Vec<RemotePhoto>>,
    content: HashMap<String, Vec<u8>>,
    failing_ids: Vec<String>,
    two_factor_pending: Mutex<bool>,
    download_calls: AtomicUsize,
}

impl FakeCloud {
    fn new() -> Self {
        Self::default()
    }

    fn with_album(mut self, name: &str, kind: AlbumKind, photos: Vec<(&str, &str, u64)>) -> Self {
        let entries: Vec<RemotePhoto> = photos
            .iter()
            .map(|(id, filename, size)| RemotePhoto {
                remote_id: id.to_string(),
                filename: filename.to_string(),
                size_bytes: *size,
                album_name: name.to_string(),
                kind,
            })
            .collect();
        for (id, _, size) in &photos {
            self.content.insert(id.to_string(), vec![0xAB; *size as usize]);
        }
        self.albums.push(Album::new(name, kind, entries.len() as u64));
        self.photos.insert(name.to_string(), entries);
        self
    }

    fn requiring_two_factor(self) -> Self {
        *self.two_factor_pending.lock().unwrap() = true;
        self
    }

    fn with_failing_download(mut self, remote_id: &str) -> Self {
        self.failing_ids.push(remote_id.to_string());
        self
    }

    fn downloads(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ICloudSession for FakeCloud {
    async fn authenticate(&self) -> Result<AuthOutcome, CloudError> {
        if *self.two_factor_pending.lock().unwrap() {
            Ok(AuthOutcome::TwoFactorRequired)
        } else {
            Ok(AuthOutcome::Ok)
        }
    }

    async fn request_2fa(&self) -> Result<RequestOutcome, CloudError> {
        Ok(RequestOutcome::Ok)
    }

    async fn verify_2fa(&self, code: &str) -> Result<VerifyOutcome, CloudError> {
        if code == "123456" {
            *self.two_factor_pending.lock().unwrap() = false;
            Ok(VerifyOutcome::Ok)
        } else {
            Ok(VerifyOutcome::CodeInvalid)
        }
    }

    async fn trust_session(&self) -> Result<(), CloudError> {
        Ok(())
    }

    async fn list_albums(&self) -> Result<Vec<Album>, CloudError> {
        Ok(self.albums.clone())
    }

    async fn list_photos(&self, album: &Album) -> Result<Vec<RemotePhoto>, CloudError> {
        Ok(self.photos.get(&album.name).cloned().unwrap_or_default())
    }

    async fn download(&self, remote_id: &str) -> Result<ByteStream, CloudError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_ids.iter().any(|id| id == remote_id) {
            return Err(CloudError::ServiceUnavailable("simulated outage".into()));
        }

        let Some(content) = self.content.get(remote_id) else {
            return Err(CloudError::NotFound(remote_id.to_string()));
        };

        let chunks: Vec<Result<Vec<u8>, CloudError>> = content
            .chunks(256)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[derive(Default)]
struct FakeNotifier {
    events: Mutex<Vec<(NotifyKind, Option<String>)>>,
}

impl FakeNotifier {
    fn auth_required_url(&self) -> Option<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(kind, _)| *kind == NotifyKind::AuthRequired)
            .and_then(|(_, url)| url.clone())
    }

    fn count(&self, kind: NotifyKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl INotifier for FakeNotifier {
    async fn notify(
        &self,
        kind: NotifyKind,
        _title: &str,
        _body: &str,
        url: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.events
            .lock()
            .unwrap()
            .push((kind, url.map(|u| u.to_string())));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dirs: (TempDir, TempDir),
    config: Config,
    tracker: Arc<SqlitePhotoTracker>,
}

async fn harness() -> Harness {
    let sync_dir = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();

    let config = Config {
        sync_directory: sync_dir.path().to_path_buf(),
        database_parent_directory: db_dir.path().to_string_lossy().into_owned(),
        auth_web_port_range: PortRange {
            start: 28080,
            end: 28980,
        },
        ..Config::default()
    };

    let tracker = Arc::new(SqlitePhotoTracker::open(db_dir.path()).await.unwrap());

    Harness {
        _dirs: (sync_dir, db_dir),
        config,
        tracker,
    }
}

fn engine_with(
    harness: &Harness,
    cloud: Arc<FakeCloud>,
    notifier: Option<Arc<FakeNotifier>>,
) -> SyncEngine {
    let notifier: Option<Arc<dyn INotifier>> = match notifier {
        Some(n) => Some(n),
        None => None,
    };
    SyncEngine::new(cloud, harness.tracker.clone(), notifier, harness.config.clone())
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_fresh_sync_downloads_photo() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "IMG_1.JPG", 1024)],
    ));
    let engine = engine_with(&h, cloud.clone(), None);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    assert_eq!(report.downloaded, 1);
    let file = h.config.sync_directory.join("Trip/IMG_1.JPG");
    assert_eq!(std::fs::metadata(&file).unwrap().len(), 1024);

    let record = h.tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert!(!record.deleted_locally);
    assert_eq!(record.remote_id, "r1");
    assert_eq!(record.local_relpath, "Trip/IMG_1.JPG");
}

#[tokio::test]
async fn test_local_deletion_is_respected() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "IMG_1.JPG", 1024)],
    ));
    let engine = engine_with(&h, cloud.clone(), None);
    let signals = SyncSignals::new();

    engine.run_cycle(&signals).await.unwrap();
    let file = h.config.sync_directory.join("Trip/IMG_1.JPG");
    std::fs::remove_file(&file).unwrap();

    // Second cycle notices the deletion and flags the record.
    let report = engine.run_cycle(&signals).await.unwrap();
    assert_eq!(report.downloaded, 0);
    assert!(!file.exists());
    let record = h.tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert!(record.deleted_locally);

    // Third cycle must not resurrect it either.
    let report = engine.run_cycle(&signals).await.unwrap();
    assert_eq!(report.downloaded, 0);
    assert!(!file.exists());
}

#[tokio::test]
async fn test_second_cycle_is_idempotent() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "IMG_1.JPG", 1024)],
    ));
    let engine = engine_with(&h, cloud.clone(), None);
    let signals = SyncSignals::new();

    engine.run_cycle(&signals).await.unwrap();
    let downloads_after_first = cloud.downloads();
    let before = h.tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let report = engine.run_cycle(&signals).await.unwrap();

    assert_eq!(report.downloaded, 0);
    assert_eq!(cloud.downloads(), downloads_after_first);

    let after = h.tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert!(after.last_checked_at > before.last_checked_at);
    assert_eq!(after.downloaded_at, before.downloaded_at);
}

#[tokio::test]
async fn test_allowlist_limits_albums() {
    let h = harness().await;
    let mut config = h.config.clone();
    config.personal_album_names_to_include = BTreeSet::from(["Keep".to_string()]);

    let cloud = Arc::new(
        FakeCloud::new()
            .with_album("Keep", AlbumKind::Personal, vec![("r1", "a.jpg", 10)])
            .with_album("Skip", AlbumKind::Personal, vec![("r2", "b.jpg", 10)]),
    );
    let engine = SyncEngine::new(cloud.clone(), h.tracker.clone(), None, config);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    assert_eq!(report.downloaded, 1);
    assert!(h.config.sync_directory.join("Keep/a.jpg").exists());
    assert!(!h.config.sync_directory.join("Skip").exists());
    assert!(h.tracker.get("b.jpg", "Skip").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_configured_album_aborts_cycle() {
    let h = harness().await;
    let mut config = h.config.clone();
    config.personal_album_names_to_include = BTreeSet::from(["Ghost".to_string()]);

    let cloud = Arc::new(FakeCloud::new().with_album(
        "Keep",
        AlbumKind::Personal,
        vec![("r1", "a.jpg", 10)],
    ));
    let engine = SyncEngine::new(cloud, h.tracker.clone(), None, config);

    let err = engine.run_cycle(&SyncSignals::new()).await.unwrap_err();
    match err {
        EngineError::AlbumConfig(DomainError::ConfiguredAlbumMissing(name)) => {
            assert_eq!(name, "Ghost");
        }
        other => panic!("expected ConfiguredAlbumMissing, got {other:?}"),
    }
}

#[tokio::test]
async fn test_two_factor_flow_through_web_coordinator() {
    let h = harness().await;
    let cloud = Arc::new(
        FakeCloud::new()
            .with_album("Trip", AlbumKind::Personal, vec![("r1", "IMG_1.JPG", 512)])
            .requiring_two_factor(),
    );
    let notifier = Arc::new(FakeNotifier::default());
    let engine = Arc::new(engine_with(&h, cloud.clone(), Some(notifier.clone())));

    let signals = SyncSignals::new();
    let cycle = {
        let engine = engine.clone();
        let signals = signals.clone();
        tokio::spawn(async move { engine.run_cycle(&signals).await })
    };

    // Wait for the coordinator URL to surface through the notifier.
    let url = {
        let mut url = None;
        for _ in 0..100 {
            if let Some(found) = notifier.auth_required_url() {
                url = Some(found);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        url.expect("AuthRequired notification with URL")
    };

    // The user enters the code on the web page.
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}submit", url))
        .json(&serde_json::json!({"code": "123456"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let report = cycle.await.unwrap().unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(notifier.count(NotifyKind::AuthSuccess), 1);

    // The session is trusted now: a second cycle runs without a prompt.
    let report = engine.run_cycle(&signals).await.unwrap();
    assert_eq!(report.downloaded, 0);
    assert_eq!(notifier.count(NotifyKind::AuthRequired), 1);
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[tokio::test]
async fn test_same_filename_in_two_albums_downloads_both() {
    let h = harness().await;
    let cloud = Arc::new(
        FakeCloud::new()
            .with_album("Trip", AlbumKind::Personal, vec![("r1", "IMG_1.JPG", 100)])
            .with_album("Keep", AlbumKind::Personal, vec![("r2", "IMG_1.JPG", 200)]),
    );
    let engine = engine_with(&h, cloud, None);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    assert_eq!(report.downloaded, 2);
    assert_eq!(
        std::fs::metadata(h.config.sync_directory.join("Trip/IMG_1.JPG"))
            .unwrap()
            .len(),
        100
    );
    assert_eq!(
        std::fs::metadata(h.config.sync_directory.join("Keep/IMG_1.JPG"))
            .unwrap()
            .len(),
        200
    );
}

#[tokio::test]
async fn test_hostile_filenames_are_normalized_or_skipped() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![
            ("r1", "../evil.jpg", 10),
            ("r2", "name .  ", 10),
            ("r3", "/////", 10),
        ],
    ));
    let engine = engine_with(&h, cloud, None);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    // Two names survive normalization, one is skipped with a warning.
    assert_eq!(report.downloaded, 2);
    assert!(h.config.sync_directory.join("Trip/..evil.jpg").exists());
    assert!(h.config.sync_directory.join("Trip/name").exists());
    // Nothing escaped the album directory.
    assert!(!h.config.sync_directory.join("evil.jpg").exists());
    assert!(!h.config.sync_directory.parent().unwrap().join("evil.jpg").exists());
}

#[tokio::test]
async fn test_duplicate_filenames_first_wins() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "IMG_1.JPG", 100), ("r2", "IMG_1.JPG", 200)],
    ));
    let engine = engine_with(&h, cloud, None);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    assert_eq!(report.downloaded, 1);
    // First occurrence won.
    let record = h.tracker.get("IMG_1.JPG", "Trip").await.unwrap().unwrap();
    assert_eq!(record.remote_id, "r1");
    assert_eq!(
        std::fs::metadata(h.config.sync_directory.join("Trip/IMG_1.JPG"))
            .unwrap()
            .len(),
        100
    );
}

#[tokio::test]
async fn test_download_cap_breaks_out_of_cycle() {
    let h = harness().await;
    let mut config = h.config.clone();
    config.max_downloads = 1;

    let cloud = Arc::new(
        FakeCloud::new()
            .with_album("A", AlbumKind::Personal, vec![("r1", "a.jpg", 10)])
            .with_album("B", AlbumKind::Personal, vec![("r2", "b.jpg", 10)]),
    );
    let engine = SyncEngine::new(cloud.clone(), h.tracker.clone(), None, config);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(cloud.downloads(), 1);
}

#[tokio::test]
async fn test_oversized_photos_are_skipped() {
    let h = harness().await;
    let mut config = h.config.clone();
    config.max_file_size_mb = 1;

    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "huge.jpg", 2 * 1024 * 1024), ("r2", "small.jpg", 10)],
    ));
    let engine = SyncEngine::new(cloud, h.tracker.clone(), None, config);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert!(!h.config.sync_directory.join("Trip/huge.jpg").exists());
    assert!(h.config.sync_directory.join("Trip/small.jpg").exists());
}

#[tokio::test]
async fn test_consecutive_failures_abandon_album() {
    let h = harness().await;
    let mut cloud = FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![
            ("f1", "a.jpg", 10),
            ("f2", "b.jpg", 10),
            ("f3", "c.jpg", 10),
            ("f4", "d.jpg", 10),
            ("f5", "e.jpg", 10),
            ("r6", "f.jpg", 10),
        ],
    );
    for id in ["f1", "f2", "f3", "f4", "f5"] {
        cloud = cloud.with_failing_download(id);
    }
    let cloud = Arc::new(cloud);
    let engine = engine_with(&h, cloud.clone(), None);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    // Five failures abandon the album before f.jpg is attempted.
    assert_eq!(report.failed, 5);
    assert_eq!(report.downloaded, 0);
    assert_eq!(cloud.downloads(), 5);
    assert!(!h.config.sync_directory.join("Trip/f.jpg").exists());
}

#[tokio::test]
async fn test_per_photo_failure_does_not_stop_album() {
    let h = harness().await;
    let cloud = Arc::new(
        FakeCloud::new()
            .with_album(
                "Trip",
                AlbumKind::Personal,
                vec![("f1", "a.jpg", 10), ("r2", "b.jpg", 10)],
            )
            .with_failing_download("f1"),
    );
    let engine = engine_with(&h, cloud, None);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.downloaded, 1);
    assert!(h.config.sync_directory.join("Trip/b.jpg").exists());
}

#[tokio::test]
async fn test_size_mismatch_triggers_redownload() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "IMG_1.JPG", 1024)],
    ));
    let engine = engine_with(&h, cloud.clone(), None);
    let signals = SyncSignals::new();

    engine.run_cycle(&signals).await.unwrap();

    // Truncate the local copy; the next cycle repairs it.
    let file = h.config.sync_directory.join("Trip/IMG_1.JPG");
    std::fs::write(&file, b"stub").unwrap();

    let report = engine.run_cycle(&signals).await.unwrap();
    assert_eq!(report.downloaded, 1);
    assert_eq!(std::fs::metadata(&file).unwrap().len(), 1024);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = harness().await;
    let mut config = h.config.clone();
    config.dry_run = true;

    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "IMG_1.JPG", 1024)],
    ));
    let engine = SyncEngine::new(cloud.clone(), h.tracker.clone(), None, config);

    let report = engine.run_cycle(&SyncSignals::new()).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.would_download, 1);
    assert_eq!(report.downloaded, 0);
    assert_eq!(cloud.downloads(), 0);
    // Not even the album directory is created.
    assert!(!h.config.sync_directory.join("Trip").exists());
    assert!(h.tracker.get("IMG_1.JPG", "Trip").await.unwrap().is_none());
}

#[tokio::test]
async fn test_shutdown_signal_interrupts_between_photos() {
    let h = harness().await;
    let cloud = Arc::new(FakeCloud::new().with_album(
        "Trip",
        AlbumKind::Personal,
        vec![("r1", "a.jpg", 10), ("r2", "b.jpg", 10)],
    ));
    let engine = engine_with(&h, cloud, None);

    let signals = SyncSignals::new();
    signals.request_shutdown();

    let report = engine.run_cycle(&signals).await.unwrap();
    assert!(report.interrupted);
    assert_eq!(report.downloaded, 0);
}
