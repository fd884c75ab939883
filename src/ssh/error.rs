//! SSH error types

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the SSH transport layer.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication rejected for {user}@{host}")]
    AuthFailed { user: String, host: String },

    #[error("Session not connected")]
    NotConnected,

    #[error("Operation timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("SFTP error: {0}")]
    Sftp(String),
}

impl SshError {
    /// Transport or authentication failures. Not retried at this layer.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::AuthFailed { .. })
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Channel(e.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for SshError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        SshError::Sftp(e.to_string())
    }
}
