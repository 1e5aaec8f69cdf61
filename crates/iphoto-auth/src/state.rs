//! 2FA verification state machine
//!
//! States and transitions:
//!
//! ```text
//! idle ──start──► listening
//! listening ──request new code──► requested
//! requested ──cloud rejects──► listening (error displayed)
//! requested ──cloud accepts──► awaiting_code
//! listening / awaiting_code ──submit code──► validating
//! validating ──code accepted──► success (terminal)
//! validating ──code rejected──► awaiting_code (error displayed)
//! any non-terminal ──timeout──► failed (terminal)
//! any non-terminal ──external cancel──► cancelled (terminal)
//! ```
//!
//! All transitions are serialized through the mutex wrapping
//! [`StateMachine`]; HTTP handlers hold it only for the duration of a
//! transition, never across a network call.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// The coordinator's externally visible state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Constructed, server not yet started
    Idle,
    /// Web interface up, waiting for the user
    Listening,
    /// A code resend is in flight to the cloud
    Requested,
    /// The cloud dispatched a code; waiting for the user to type it
    AwaitingCode,
    /// A submitted code is being verified; only one in flight at a time
    Validating,
    /// Terminal: code accepted
    Success,
    /// Terminal: timed out
    Failed,
    /// Terminal: cancelled from outside
    Cancelled,
}

impl AuthState {
    /// Whether this state ends the coordinator's life
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthState::Success | AuthState::Failed | AuthState::Cancelled
        )
    }
}

impl Display for AuthState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthState::Idle => "idle",
            AuthState::Listening => "listening",
            AuthState::Requested => "requested",
            AuthState::AwaitingCode => "awaiting_code",
            AuthState::Validating => "validating",
            AuthState::Success => "success",
            AuthState::Failed => "failed",
            AuthState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot served by `GET /status` and published to waiters
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    /// Current state
    pub state: AuthState,
    /// Human-readable message displayed verbatim by the web page
    pub message: String,
}

/// The mutable state machine
///
/// Invalid transitions are ignored with a warning rather than panicking;
/// the HTTP surface reports conflicts (409) before calling in.
#[derive(Debug)]
pub struct StateMachine {
    state: AuthState,
    message: String,
    accepted_code: Option<String>,
}

impl StateMachine {
    /// Creates a machine in the `Idle` state
    pub fn new() -> Self {
        Self {
            state: AuthState::Idle,
            message: "Waiting to start".to_string(),
            accepted_code: None,
        }
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Current user-facing message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The code that reached `Success`, if any
    pub fn accepted_code(&self) -> Option<&str> {
        self.accepted_code.as_deref()
    }

    /// Snapshot for `/status` and watch publication
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            message: self.message.clone(),
        }
    }

    /// idle -> listening
    pub fn start(&mut self) {
        if self.state == AuthState::Idle {
            self.set(AuthState::Listening, "Enter the 6-digit code sent to your devices");
        }
    }

    /// listening -> requested
    pub fn begin_request(&mut self) -> bool {
        if self.state == AuthState::Listening || self.state == AuthState::AwaitingCode {
            self.set(AuthState::Requested, "Requesting a new code");
            true
        } else {
            false
        }
    }

    /// requested -> awaiting_code
    pub fn request_accepted(&mut self) {
        if self.state == AuthState::Requested {
            self.set(AuthState::AwaitingCode, "A new code was sent to your devices");
        }
    }

    /// requested -> listening, error displayed
    pub fn request_rejected(&mut self, reason: &str) {
        if self.state == AuthState::Requested {
            self.set(AuthState::Listening, reason);
        }
    }

    /// listening / awaiting_code -> validating
    ///
    /// Returns false when a verification is already in flight or the
    /// machine is in a state that cannot accept a submission.
    pub fn begin_validation(&mut self) -> bool {
        match self.state {
            AuthState::Listening | AuthState::AwaitingCode => {
                self.set(AuthState::Validating, "Verifying code");
                true
            }
            _ => false,
        }
    }

    /// validating -> success (terminal)
    pub fn code_accepted(&mut self, code: &str) {
        if self.state == AuthState::Validating {
            self.accepted_code = Some(code.to_string());
            self.set(AuthState::Success, "Code accepted; you can close this page");
        }
    }

    /// validating -> awaiting_code, error displayed
    pub fn code_rejected(&mut self, reason: &str) {
        if self.state == AuthState::Validating {
            self.set(AuthState::AwaitingCode, reason);
        }
    }

    /// any non-terminal -> failed (terminal)
    pub fn timeout(&mut self) {
        if !self.state.is_terminal() {
            self.set(AuthState::Failed, "Timed out waiting for a code");
        }
    }

    /// any non-terminal -> cancelled (terminal)
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.set(AuthState::Cancelled, "Cancelled");
        }
    }

    fn set(&mut self, state: AuthState, message: &str) {
        tracing::debug!(from = %self.state, to = %state, "2FA state transition");
        self.state = state;
        self.message = message.to_string();
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
