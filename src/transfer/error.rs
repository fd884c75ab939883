//! Transfer error types

use thiserror::Error;

use crate::ssh::SshError;

/// Errors raised while moving a file from the local machine into a container
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Local I/O error on {path}: {reason}")]
    LocalIo { path: String, reason: String },

    #[error("Failed to create remote directory {path}: {reason}")]
    CreateDir { path: String, reason: String },

    #[error("Upload to {path} failed: {reason}")]
    Upload { path: String, reason: String },

    #[error("Command failed with exit code {exit_code}: {command}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("No workload matching '{selector}' in namespace '{namespace}'")]
    ContainerNotFound { namespace: String, selector: String },

    #[error(transparent)]
    Ssh(#[from] SshError),
}

impl TransferError {
    /// True for remote commands that ran and reported failure, including
    /// the case where container selection matched nothing.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. } | Self::ContainerNotFound { .. }
        )
    }

    /// Captured output of a failed remote command: stderr when there is
    /// any, otherwise stdout. A PTY merges both streams into stdout.
    pub fn failure_output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stdout, stderr, .. } => [stderr, stdout]
                .into_iter()
                .map(|s| s.trim())
                .find(|s| !s.is_empty()),
            _ => None,
        }
    }

    pub(crate) fn local_io(path: &std::path::Path, e: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl serde::Serialize for TransferError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
