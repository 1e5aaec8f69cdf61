//! iPhoto Sync - Reconcile engine and scheduler
//!
//! Provides:
//! - [`engine::SyncEngine`] - one album-aware reconcile cycle end-to-end
//! - [`scheduler::Scheduler`] - single vs continuous execution, 2FA
//!   back-off, maintenance cadence, graceful shutdown
//! - [`filter::AlbumFilter`] - include/exclude resolution
//! - [`lock::InstanceLock`] - single-instance enforcement
//! - [`backoff::TwoFactorBackoff`] - persisted exponential back-off

pub mod backoff;
pub mod engine;
pub mod filesystem;
pub mod filter;
pub mod lock;
pub mod scheduler;
pub mod signals;

pub use engine::{CycleReport, EngineError, SyncEngine};
pub use filter::AlbumFilter;
pub use lock::{InstanceLock, LockError};
pub use scheduler::Scheduler;
pub use signals::SyncSignals;
