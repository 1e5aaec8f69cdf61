//! Port definitions (hexagonal architecture)
//!
//! Ports are the trait seams between the sync engine and its adapters.
//! Each adapter crate implements exactly one of these.

pub mod cloud_session;
pub mod notifier;
pub mod photo_tracker;

pub use cloud_session::{
    AuthOutcome, ByteStream, CloudError, ICloudSession, RequestOutcome, VerifyOutcome,
};
pub use notifier::{INotifier, NotifyError, NotifyKind};
pub use photo_tracker::{IPhotoTracker, TrackerError};
