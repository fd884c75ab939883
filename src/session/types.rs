//! Session value types shared by the SSH, transfer and deploy layers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use zeroize::Zeroizing;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Connect timeout used when the configuration does not specify one.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters for one [`RemoteSession`](crate::ssh::RemoteSession).
#[derive(Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Zeroizing<String>,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Create a config with password authentication and the default timeout
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Zeroizing::new(password.into()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Get display string (user@host:port)
    pub fn display_string(&self) -> String {
        if self.port == DEFAULT_PORT {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }
}

// Keep the password out of debug output.
impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Outcome of one remote command execution.
///
/// `exit_code == 0` is the only success signal. When the server closes the
/// channel without reporting an exit status the code is `-1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Exit code recorded when the remote side never sent an exit status.
pub const MISSING_EXIT_STATUS: i32 = -1;

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Build a successful result carrying only stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Build a failed result
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}
