//! Connection State Machine
//!
//! Tracks the lifecycle of a [`RemoteSession`](crate::ssh::RemoteSession):
//!
//! ```text
//! ┌──────────────┐     connect()     ┌──────────────┐
//! │ Disconnected │ ─────────────────► │  Connecting  │
//! └──────────────┘                    └──────┬───────┘
//!        ▲                                   │
//!        │                          success / failure
//!        │                                   │
//!        │                  ┌────────────────┴────────────────┐
//!        │                  ▼                                  ▼
//!        │          ┌──────────────┐                  ┌──────────────┐
//!        └──────────│  Connected   │                  │    Error     │
//!   disconnect()    └──────────────┘                  └──────────────┘
//! ```
//!
//! A session in `Error` holds no transport and may be connected again.
//! Every transition is accepted; the session keeps the handle and the
//! status in step.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, or explicitly disconnected
    #[default]
    Disconnected,
    /// SSH handshake + password authentication in progress
    Connecting,
    /// Transport and SFTP channel are live
    Connected,
    /// The last connect attempt failed
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Lifecycle of one connection: current state, when it was entered, and
/// the reason of the last failed connect.
#[derive(Debug)]
pub struct ConnectionStatus {
    state: ConnectionState,
    error_message: Option<String>,
    state_changed_at: Instant,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            error_message: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reason of the last failed connect, kept until the next attempt
    pub fn error(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Time spent in the current state
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_changed_at.elapsed()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// A new attempt replaces any earlier one, including an attempt whose
    /// future was dropped while still `Connecting`.
    pub fn connecting(&mut self) {
        self.error_message = None;
        self.transition_to(ConnectionState::Connecting);
    }

    pub fn connected(&mut self) {
        self.transition_to(ConnectionState::Connected);
    }

    pub fn failed(&mut self, error: String) {
        self.error_message = Some(error);
        self.transition_to(ConnectionState::Error);
    }

    /// Idempotent. The last connect error survives so it can still be
    /// reported after cleanup.
    pub fn disconnected(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.transition_to(ConnectionState::Disconnected);
        }
    }

    fn transition_to(&mut self, new_state: ConnectionState) {
        tracing::debug!("[ssh-session] state {} -> {}", self.state, new_state);
        self.state = new_state;
        self.state_changed_at = Instant::now();
    }
}
