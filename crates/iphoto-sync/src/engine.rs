//! Album-aware reconcile engine
//!
//! The [`SyncEngine`] runs one cycle end-to-end:
//!
//! 1. Acquire the instance lock (scoped)
//! 2. Back up the tracker
//! 3. Authenticate, driving the 2FA coordinator when required
//! 4. Resolve the album filter against the remote listing
//! 5. Reconcile every selected album photo-by-photo against the tracker
//!    and the filesystem
//!
//! ## Guarantees
//!
//! - A record flagged `deleted_locally` is never downloaded again.
//! - No operation issued to the cloud session is a deletion.
//! - Downloads are atomic: stream to a `.part` file, rename on success.
//! - Unchanged libraries produce zero-download cycles (idempotence).
//!
//! Per-photo errors stay per-photo; per-album errors abort the album;
//! authentication and tracker errors abort the cycle, and so does a
//! full disk under the sync root.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use iphoto_auth::server::OBTAIN_CODE_TIMEOUT;
use iphoto_auth::{TwoFactorCoordinator, TwoFactorGateway};
use iphoto_core::config::Config;
use iphoto_core::domain::naming::{normalize_album_dir, normalize_filename, relpath};
use iphoto_core::domain::{Album, DomainError, RemotePhoto};
use iphoto_core::ports::cloud_session::{
    AuthOutcome, CloudError, ICloudSession, RequestOutcome, VerifyOutcome,
};
use iphoto_core::ports::notifier::{INotifier, NotifyKind};
use iphoto_core::ports::photo_tracker::{IPhotoTracker, TrackerError};

use crate::filesystem::{
    clean_stale_parts, ensure_album_dir, local_file_exists, local_file_matches,
    write_stream_atomic, DiskFull,
};
use crate::lock::{InstanceLock, LockError, LOCK_FILE_NAME};
use crate::signals::SyncSignals;

/// Deadline for a single photo download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Consecutive download failures after which the rest of an album is skipped.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

// ============================================================================
// Errors and reports
// ============================================================================

/// Cycle-aborting failures, mapped to exit codes by the CLI
#[derive(Debug, Error)]
pub enum EngineError {
    /// Credentials rejected by the service
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 2FA was required but never completed
    #[error("Two-factor authentication incomplete: {0}")]
    TwoFactorIncomplete(String),

    /// The remote service is unreachable at cycle scope
    #[error("Cloud service unavailable: {0}")]
    Cloud(String),

    /// An allowlisted album does not exist remotely
    #[error(transparent)]
    AlbumConfig(DomainError),

    /// The tracker store failed
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Another instance holds the lock
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The sync root itself is unusable
    #[error("Filesystem error: {0}")]
    Filesystem(String),
}

/// Summary of one completed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Identifier used to correlate log lines of one cycle
    pub cycle_id: Uuid,
    /// Files written to disk
    pub downloaded: u32,
    /// Photos that needed no action (already present or deleted locally)
    pub skipped: u32,
    /// Per-photo failures that did not abort the cycle
    pub failed: u32,
    /// Downloads a dry run would have performed
    pub would_download: u32,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Whether a shutdown request cut the cycle short
    pub interrupted: bool,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl CycleReport {
    fn new(cycle_id: Uuid, dry_run: bool) -> Self {
        Self {
            cycle_id,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            would_download: 0,
            dry_run,
            interrupted: false,
            duration_ms: 0,
        }
    }
}

/// What the reconcile decision says about one remote photo
enum Reconcile {
    /// Nothing to do; optionally advance `last_checked_at`
    Skip { touch: bool },
    /// The user deleted the local copy since last sync; honor it
    HonorDeletion,
    /// Fetch the bytes
    Download,
}

// ============================================================================
// Engine
// ============================================================================

/// One-cycle sync engine over the port seams
pub struct SyncEngine {
    cloud: Arc<dyn ICloudSession>,
    tracker: Arc<dyn IPhotoTracker>,
    notifier: Option<Arc<dyn INotifier>>,
    config: Config,
}

impl SyncEngine {
    /// Creates an engine over the given adapters.
    pub fn new(
        cloud: Arc<dyn ICloudSession>,
        tracker: Arc<dyn IPhotoTracker>,
        notifier: Option<Arc<dyn INotifier>>,
        config: Config,
    ) -> Self {
        Self {
            cloud,
            tracker,
            notifier,
            config,
        }
    }

    /// Runs one full sync cycle.
    #[tracing::instrument(skip(self, signals))]
    pub async fn run_cycle(&self, signals: &SyncSignals) -> Result<CycleReport, EngineError> {
        let start = std::time::Instant::now();
        let cycle_id = Uuid::new_v4();
        let mut report = CycleReport::new(cycle_id, self.config.dry_run);

        info!(%cycle_id, dry_run = self.config.dry_run, "Starting sync cycle");

        if !self.config.dry_run {
            std::fs::create_dir_all(&self.config.sync_directory)
                .map_err(|e| EngineError::Filesystem(format!("Cannot create sync root: {}", e)))?;
        }

        // Step 1: instance lock, held for the rest of the cycle.
        let _lock = self.acquire_lock()?;

        // Step 2: tracker backup. A dry run makes no writes anywhere.
        if self.config.dry_run {
            debug!("Dry run: skipping tracker backup");
        } else {
            self.tracker.backup().await?;
        }

        // Step 3: authentication, including the 2FA dance when needed.
        self.ensure_authenticated(signals).await?;

        // Step 4: album resolution.
        let discovered = self
            .cloud
            .list_albums()
            .await
            .map_err(|e| EngineError::Cloud(e.to_string()))?;
        let selected = crate::filter::AlbumFilter::from_config(&self.config)
            .select(&discovered)
            .map_err(EngineError::AlbumConfig)?;

        info!(albums = selected.len(), "Albums selected for sync");

        // Step 5: per-album reconcile.
        'albums: for album in &selected {
            if signals.is_shutdown() {
                report.interrupted = true;
                break;
            }

            match self.reconcile_album(album, signals, &mut report).await? {
                AlbumOutcome::Completed => {}
                AlbumOutcome::Interrupted => {
                    report.interrupted = true;
                    break 'albums;
                }
                AlbumOutcome::DownloadCapReached => {
                    info!(
                        cap = self.config.max_downloads,
                        "Download cap reached, ending cycle"
                    );
                    break 'albums;
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;

        if report.dry_run {
            info!(
                would_download = report.would_download,
                would_skip = report.skipped,
                "Dry run complete: would download {}, would skip {}",
                report.would_download,
                report.skipped
            );
        } else {
            info!(
                downloaded = report.downloaded,
                skipped = report.skipped,
                failed = report.failed,
                interrupted = report.interrupted,
                duration_ms = report.duration_ms,
                "Sync cycle completed"
            );
        }

        Ok(report)
    }

    fn acquire_lock(&self) -> Result<Option<InstanceLock>, EngineError> {
        if self.config.allow_multi_instance {
            debug!("Multi-instance allowed, skipping lock");
            return Ok(None);
        }
        let lock_path = self.config.sync_directory.join(LOCK_FILE_NAME);
        Ok(Some(InstanceLock::acquire(&lock_path)?))
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    async fn ensure_authenticated(&self, signals: &SyncSignals) -> Result<(), EngineError> {
        match self.cloud.authenticate().await {
            Ok(AuthOutcome::Ok) => Ok(()),
            Ok(AuthOutcome::TwoFactorRequired) => self.run_two_factor(signals).await,
            Ok(AuthOutcome::InvalidCredentials) => {
                Err(EngineError::Auth("invalid credentials".to_string()))
            }
            Ok(AuthOutcome::ServiceUnavailable) => Err(EngineError::Cloud(
                "authentication service unavailable".to_string(),
            )),
            Err(e) => Err(EngineError::Cloud(e.to_string())),
        }
    }

    /// Drives the local 2FA coordinator until the session is usable.
    async fn run_two_factor(&self, signals: &SyncSignals) -> Result<(), EngineError> {
        info!("Two-factor authentication required, starting web coordinator");

        let coordinator = TwoFactorCoordinator::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            self.config.auth_web_port_range,
        )
        .map_err(|e| EngineError::TwoFactorIncomplete(e.to_string()))?;

        let gateway = Arc::new(SessionGateway {
            cloud: self.cloud.clone(),
        });

        let running = coordinator
            .start(gateway)
            .await
            .map_err(|e| EngineError::TwoFactorIncomplete(e.to_string()))?;

        self.notify(
            NotifyKind::AuthRequired,
            "2FA code required",
            "Photo sync is paused until you enter the verification code.",
            Some(running.url()),
        )
        .await;

        let outcome = tokio::select! {
            result = running.wait(OBTAIN_CODE_TIMEOUT) => result,
            _ = signals.shutdown_requested() => {
                running.cancel();
                Err(iphoto_auth::ObtainFailure::Cancelled)
            }
        };
        let url = running.url().to_string();
        running.shutdown().await;

        match outcome {
            Ok(_code) => {
                // The gateway already verified the code; trusting the
                // session is best-effort.
                if let Err(e) = self.cloud.trust_session().await {
                    warn!(error = %e, "Could not mark session as trusted");
                }
                self.notify(
                    NotifyKind::AuthSuccess,
                    "2FA completed",
                    "Photo sync is authenticated and resuming.",
                    None,
                )
                .await;

                // The session must now authenticate cleanly.
                match self.cloud.authenticate().await {
                    Ok(AuthOutcome::Ok) => Ok(()),
                    other => {
                        warn!(?other, "Session unusable after 2FA verification");
                        Err(EngineError::TwoFactorIncomplete(
                            "session not usable after verification".to_string(),
                        ))
                    }
                }
            }
            Err(failure) => {
                debug!(url = %url, "2FA exchange ended without a code");
                Err(EngineError::TwoFactorIncomplete(failure.to_string()))
            }
        }
    }

    // ========================================================================
    // Album reconcile
    // ========================================================================

    async fn reconcile_album(
        &self,
        album: &Album,
        signals: &SyncSignals,
        report: &mut CycleReport,
    ) -> Result<AlbumOutcome, EngineError> {
        let album_dir = match normalize_album_dir(&album.name) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(album = %album.name, error = %e, "Skipping album with unusable name");
                return Ok(AlbumOutcome::Completed);
            }
        };

        let album_path = if self.config.dry_run {
            // No writes in a dry run, directories included.
            self.config.sync_directory.join(&album_dir)
        } else {
            match ensure_album_dir(&self.config.sync_directory, &album_dir) {
                Ok(path) => path,
                Err(e) => {
                    warn!(album = %album.name, error = %e, "Cannot create album directory, skipping album");
                    return Ok(AlbumOutcome::Completed);
                }
            }
        };

        if !self.config.dry_run {
            clean_stale_parts(&album_path);
        }

        let photos = match self.cloud.list_photos(album).await {
            Ok(photos) => photos,
            Err(e) => {
                warn!(album = %album.name, error = %e, "Photo listing failed, skipping album");
                report.failed += 1;
                return Ok(AlbumOutcome::Completed);
            }
        };

        debug!(album = %album.name, photos = photos.len(), "Reconciling album");

        let mut consecutive_failures: u32 = 0;
        let mut seen_names: HashSet<String> = HashSet::new();

        for photo in photos {
            // Cooperative checkpoints between photos.
            if signals.is_shutdown() {
                return Ok(AlbumOutcome::Interrupted);
            }
            if signals.take_maintenance() {
                self.run_maintenance().await?;
            }

            let filename = match normalize_filename(&photo.filename) {
                Ok(name) => name,
                Err(e) => {
                    warn!(album = %album.name, error = %e, "Skipping photo with unusable name");
                    report.skipped += 1;
                    continue;
                }
            };

            // First occurrence wins within one album.
            if !seen_names.insert(filename.clone()) {
                warn!(album = %album.name, photo = %filename, "Duplicate filename in album, skipping");
                report.skipped += 1;
                continue;
            }

            if self.exceeds_size_cap(&photo) {
                info!(
                    album = %album.name,
                    photo = %filename,
                    size = photo.size_bytes,
                    "Photo exceeds max_file_size_mb, skipping"
                );
                report.skipped += 1;
                continue;
            }

            let decision = self.reconcile_photo(&filename, album, &photo).await?;
            match decision {
                Reconcile::Skip { touch } => {
                    if touch && !self.config.dry_run {
                        self.tracker.touch_seen(&filename, &album.name).await?;
                    }
                    report.skipped += 1;
                }
                Reconcile::HonorDeletion => {
                    if !self.config.dry_run {
                        self.tracker.mark_deleted(&filename, &album.name).await?;
                    }
                    info!(
                        album = %album.name,
                        photo = %filename,
                        "Local deletion detected, photo will not be redownloaded"
                    );
                    report.skipped += 1;
                }
                Reconcile::Download => {
                    if self.config.dry_run {
                        report.would_download += 1;
                        continue;
                    }

                    if self.config.max_downloads > 0
                        && report.downloaded >= self.config.max_downloads
                    {
                        return Ok(AlbumOutcome::DownloadCapReached);
                    }

                    let target = RemotePhoto {
                        filename: filename.clone(),
                        ..photo.clone()
                    };
                    let target_relpath = relpath(&album_dir, &filename);

                    match self.download_photo(&album_path, &target).await {
                        Ok(bytes) => {
                            self.tracker
                                .record_download(&target, &target_relpath)
                                .await?;
                            consecutive_failures = 0;
                            report.downloaded += 1;
                            debug!(
                                album = %album.name,
                                photo = %filename,
                                bytes,
                                "Photo downloaded"
                            );
                        }
                        Err(e) => {
                            // A full disk is not a per-photo condition.
                            if e.downcast_ref::<DiskFull>().is_some() {
                                return Err(EngineError::Filesystem(e.to_string()));
                            }
                            warn!(
                                album = %album.name,
                                photo = %filename,
                                error = %e,
                                "Download failed"
                            );
                            report.failed += 1;
                            consecutive_failures += 1;
                            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                                warn!(
                                    album = %album.name,
                                    failures = consecutive_failures,
                                    "Too many consecutive failures, skipping rest of album"
                                );
                                return Ok(AlbumOutcome::Completed);
                            }
                        }
                    }
                }
            }
        }

        Ok(AlbumOutcome::Completed)
    }

    /// The reconcile decision table for one photo.
    async fn reconcile_photo(
        &self,
        filename: &str,
        album: &Album,
        photo: &RemotePhoto,
    ) -> Result<Reconcile, EngineError> {
        let record = self.tracker.get(filename, &album.name).await?;

        let Some(record) = record else {
            return Ok(Reconcile::Download);
        };

        if record.deleted_locally {
            // The user removed this photo; never bring it back.
            return Ok(Reconcile::Skip { touch: false });
        }

        if local_file_matches(
            &self.config.sync_directory,
            &record.local_relpath,
            photo.size_bytes,
        ) {
            return Ok(Reconcile::Skip { touch: true });
        }

        if !local_file_exists(&self.config.sync_directory, &record.local_relpath) {
            return Ok(Reconcile::HonorDeletion);
        }

        // Present but wrong size: refresh the local copy.
        Ok(Reconcile::Download)
    }

    async fn download_photo(
        &self,
        album_path: &PathBuf,
        photo: &RemotePhoto,
    ) -> anyhow::Result<u64> {
        let stream = self
            .cloud
            .download(&photo.remote_id)
            .await
            .map_err(|e: CloudError| anyhow::anyhow!(e))?;

        let expected = (photo.size_bytes > 0).then_some(photo.size_bytes);
        tokio::time::timeout(
            DOWNLOAD_TIMEOUT,
            write_stream_atomic(album_path, &photo.filename, stream, expected),
        )
        .await
        .map_err(|_| anyhow::anyhow!("download timed out after {:?}", DOWNLOAD_TIMEOUT))?
    }

    fn exceeds_size_cap(&self, photo: &RemotePhoto) -> bool {
        self.config.max_file_size_mb > 0
            && photo.size_bytes > self.config.max_file_size_mb * 1024 * 1024
    }

    /// Maintenance: backup plus integrity check, run at a photo boundary.
    pub async fn run_maintenance(&self) -> Result<(), EngineError> {
        info!("Running tracker maintenance");
        if !self.config.dry_run {
            self.tracker.backup().await?;
        }
        self.tracker.integrity_check().await?;
        Ok(())
    }

    /// Fire-and-forget notification; failures are logged, never retried.
    pub async fn notify(&self, kind: NotifyKind, title: &str, body: &str, url: Option<&str>) {
        if let Some(ref notifier) = self.notifier {
            if let Err(e) = notifier.notify(kind, title, body, url).await {
                warn!(kind = %kind, error = %e, "Notification delivery failed");
            }
        }
    }
}

/// How one album's reconcile ended
enum AlbumOutcome {
    Completed,
    Interrupted,
    DownloadCapReached,
}

/// Adapter giving the 2FA coordinator the two cloud capabilities it needs
struct SessionGateway {
    cloud: Arc<dyn ICloudSession>,
}

#[async_trait::async_trait]
impl TwoFactorGateway for SessionGateway {
    async fn request_code(&self) -> Result<RequestOutcome, CloudError> {
        self.cloud.request_2fa().await
    }

    async fn verify_code(&self, code: &str) -> Result<VerifyOutcome, CloudError> {
        self.cloud.verify_2fa(code).await
    }
}
