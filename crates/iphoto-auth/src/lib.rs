//! iPhoto Auth - 2FA coordinator
//!
//! When the cloud session reports that a second factor is required, this
//! crate serves a small web interface on the loopback address where the
//! user submits the 6-digit code, and drives the verification state
//! machine until a terminal state is reached.
//!
//! - [`state`] - the state machine, serialized behind one mutex
//! - [`server`] - the hyper HTTP surface and the `obtain_code` façade
//! - [`rate_limit`] - per-source submission throttling

pub mod rate_limit;
pub mod server;
pub mod state;

pub use server::{
    AuthError, ObtainFailure, RunningCoordinator, TwoFactorCoordinator, TwoFactorGateway,
};
pub use state::{AuthState, StateMachine, StateSnapshot};
