//! SSH layer
//!
//! [`RemoteSession`] owns one russh client connection and its SFTP channel.
//! The layers above talk to it through three narrow traits so that they can
//! be driven by in-memory fakes in tests:
//!
//! - [`CommandRunner`]: run one command, capture exit status and streams
//! - [`RemoteFs`]: the handful of SFTP primitives the uploader needs
//! - [`ShellHost`]: open an interactive PTY shell (privilege escalation)

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::session::CommandResult;

mod client;
pub mod error;
pub mod session;
mod shell;

pub use error::SshError;
pub use session::RemoteSession;

/// Write half of a remote file opened for upload.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Executes shell commands on a remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` and wait for it to exit.
    ///
    /// Returns `Err(SshError::Timeout)` when the command does not finish
    /// within `timeout`; a non-zero exit is an `Ok` result.
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        want_pty: bool,
    ) -> Result<CommandResult, SshError>;
}

/// Remote filesystem primitives.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, SshError>;

    /// Create a single directory. Fails if the parent is missing.
    async fn create_dir(&self, path: &str) -> Result<(), SshError>;

    /// Create or truncate a file and return a writer for it.
    async fn create_file(&self, path: &str) -> Result<RemoteWriter, SshError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError>;
}

/// An interactive shell running on a PTY.
#[async_trait]
pub trait InteractiveShell: Send {
    /// Write `line` followed by a newline.
    async fn send_line(&mut self, line: &str) -> Result<(), SshError>;

    /// Collect whatever output is buffered, returning once no new data has
    /// arrived for `idle`.
    async fn read_available(&mut self, idle: Duration) -> Result<String, SshError>;

    async fn close(&mut self);
}

/// Something that can open an [`InteractiveShell`].
#[async_trait]
pub trait ShellHost: Send + Sync {
    async fn open_shell(&self) -> Result<Box<dyn InteractiveShell>, SshError>;
}
