//! iPhoto Downloader CLI - thin entry point around the sync engine
//!
//! Responsibilities kept deliberately small:
//! - locate and validate the configuration file
//! - set up tracing from the configured log level
//! - wire the adapters into the engine and scheduler
//! - map failures onto the documented exit codes
//!
//! Exit codes: 0 success, 1 configuration error, 2 authentication
//! failure, 3 another instance running, 4 unrecoverable tracker error,
//! 5 interrupted, 6 cloud service unreachable. Code 2 is strictly for
//! credential/2FA failures; a network outage is reported as 6.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use iphoto_core::config::Config;
use iphoto_core::ports::notifier::{INotifier, NotifyKind};
use iphoto_icloud::{ICloudClient, SessionStore};
use iphoto_notify::PushoverNotifier;
use iphoto_sync::backoff::TwoFactorBackoff;
use iphoto_sync::{EngineError, Scheduler, SyncEngine, SyncSignals};
use iphoto_tracker::SqlitePhotoTracker;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_AUTH: i32 = 2;
const EXIT_ALREADY_RUNNING: i32 = 3;
const EXIT_TRACKER: i32 = 4;
const EXIT_INTERRUPTED: i32 = 5;
const EXIT_SERVICE_UNAVAILABLE: i32 = 6;

/// Environment variables carrying the account credentials.
///
/// Credential storage (keyring, env, file) is deployment plumbing; the
/// engine only needs the values present at startup.
const USERNAME_VAR: &str = "IPHOTO_USERNAME";
const PASSWORD_VAR: &str = "IPHOTO_PASSWORD";

#[derive(Debug, Parser)]
#[command(
    name = "iphoto-downloader",
    version,
    about = "Synchronize iCloud Photos into a local directory tree"
)]
struct Cli {
    /// Use an alternate configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: cannot read {}: {}", config_path.display(), e);
            return EXIT_CONFIG;
        }
    };

    let validation_errors = config.validate();
    if let Some(first) = validation_errors.first() {
        eprintln!("Configuration error: {}", first);
        return EXIT_CONFIG;
    }

    init_tracing(&config);

    let (username, password) = match credentials() {
        Ok(pair) => pair,
        Err(message) => {
            eprintln!("Configuration error: {}", message);
            return EXIT_CONFIG;
        }
    };

    // Tracker: the only component whose startup failure has its own code.
    let db_dir = config.resolved_database_dir();
    let tracker = match SqlitePhotoTracker::open(&db_dir).await {
        Ok(tracker) => Arc::new(tracker),
        Err(e) => {
            eprintln!("Tracker error: {}", e);
            return EXIT_TRACKER;
        }
    };

    let cloud = Arc::new(ICloudClient::new(
        username,
        password,
        SessionStore::default_location(),
    ));

    let notifier: Option<Arc<dyn INotifier>> = if config.pushover.enabled {
        Some(Arc::new(PushoverNotifier::new(&config.pushover)))
    } else {
        None
    };

    let signals = SyncSignals::new();
    install_signal_handlers(&signals);

    let mode = config.execution_mode;
    let engine = Arc::new(SyncEngine::new(cloud, tracker, notifier, config));
    let scheduler = Scheduler::new(
        engine.clone(),
        mode,
        signals.clone(),
        TwoFactorBackoff::load_default(),
    );

    match scheduler.run().await {
        Ok(()) => {
            if signals.is_shutdown() {
                info!("Shut down cleanly on signal");
            }
            EXIT_OK
        }
        Err(e) => {
            error!(error = %e, "Sync failed");
            eprintln!("{}", e);
            match e {
                EngineError::Auth(_) => EXIT_AUTH,
                // A network outage is not an authentication failure.
                EngineError::Cloud(_) => EXIT_SERVICE_UNAVAILABLE,
                EngineError::TwoFactorIncomplete(_) => {
                    // A shutdown mid-2FA is an interruption, not an auth failure.
                    if signals.is_shutdown() {
                        EXIT_INTERRUPTED
                    } else {
                        EXIT_AUTH
                    }
                }
                EngineError::Lock(_) => EXIT_ALREADY_RUNNING,
                EngineError::Tracker(_) => {
                    engine
                        .notify(NotifyKind::Fatal, "Photo sync failed", &e.to_string(), None)
                        .await;
                    EXIT_TRACKER
                }
                EngineError::AlbumConfig(_) | EngineError::Filesystem(_) => EXIT_CONFIG,
            }
        }
    }
}

/// Reads the account credentials from the environment.
fn credentials() -> Result<(String, String), String> {
    let username = std::env::var(USERNAME_VAR)
        .map_err(|_| format!("{} must be set", USERNAME_VAR))?;
    let password = std::env::var(PASSWORD_VAR)
        .map_err(|_| format!("{} must be set", PASSWORD_VAR))?;
    Ok((username, password))
}

/// Tracing from the configured level; `RUST_LOG` wins when set.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// SIGINT/SIGTERM set the shutdown flag; the engine finishes its current
/// photo, flushes, releases the lock, and exits.
fn install_signal_handlers(signals: &SyncSignals) {
    let signals = signals.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Shutdown signal received");
        signals.request_shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
