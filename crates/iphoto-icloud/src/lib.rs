//! iPhoto iCloud - Remote library adapter
//!
//! Implements the [`ICloudSession`](iphoto_core::ports::ICloudSession) port
//! against the iCloud web endpoints:
//! - Password + 2FA authentication with enumerated outcomes
//! - Trusted-session blob persisted with owner-only permissions
//! - Album/photo enumeration and streamed byte downloads

pub mod client;
pub mod session_store;

pub use client::ICloudClient;
pub use session_store::{SessionBlob, SessionStore};
