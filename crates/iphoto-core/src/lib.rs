//! iPhoto Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Album`, `RemotePhoto`, `PhotoRecord`
//! - **Filename normalization** - filesystem-safe names for downloaded photos
//! - **Port definitions** - Traits for adapters: `ICloudSession`,
//!   `IPhotoTracker`, `INotifier`
//! - **Configuration** - the enumerated option record consumed by every crate
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no external dependencies.
//! Ports define trait interfaces that adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;
