//! Privilege Escalation
//!
//! Switches an authenticated session to an elevated identity by driving an
//! interactive PTY shell the way a person would:
//!
//! ```text
//! Unprivileged ──escalate()──► Escalating ──marker seen──► Elevated
//!                                   │
//!                                   └──────otherwise─────► Unprivileged
//! ```
//!
//! The exchange is timing based: after each line the escalator waits a
//! settle interval before reading. An optional prompt pattern lets the wait
//! after the escalation command end as soon as the password prompt shows up.
//!
//! Elevation only exists inside a PTY session on the remote side, so the
//! result is an [`ElevatedSession`] that requests a PTY for every command
//! it runs. A plain session can never be mistaken for an elevated one.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::logging::LogSink;
use crate::session::CommandResult;
use crate::ssh::{CommandRunner, InteractiveShell, ShellHost, SshError};

/// Identity probe written after the credential.
pub const DEFAULT_PROBE: &str = "whoami";

/// Substring of the probe output that proves elevation.
pub const DEFAULT_MARKER: &str = "root";

/// How long the shell must stay quiet before a read returns.
const READ_IDLE: Duration = Duration::from_millis(200);

/// Escalation errors
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("Escalation command is empty")]
    EmptyCommand,

    #[error("Identity probe did not report '{marker}' (output: {output:?})")]
    ProbeMismatch { marker: String, output: String },

    #[error("Shell error during escalation: {0}")]
    Shell(#[from] SshError),
}

/// Progress of an escalation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Unprivileged,
    Escalating,
    Elevated,
}

/// Escalation parameters.
#[derive(Clone)]
pub struct EscalationConfig {
    /// Command that switches identity, e.g. `su -`
    pub command: String,
    /// Password typed at the prompt; skipped when empty
    pub credential: Zeroizing<String>,
    pub probe: String,
    pub marker: String,
    /// Wait before discarding the login banner
    pub initial_settle: Duration,
    /// Wait after the escalation command (upper bound with a prompt pattern)
    pub command_settle: Duration,
    pub credential_settle: Duration,
    pub probe_settle: Duration,
    /// Ends the post-command wait as soon as the output matches
    pub prompt_pattern: Option<Regex>,
}

impl EscalationConfig {
    pub fn new(command: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            credential: Zeroizing::new(credential.into()),
            probe: DEFAULT_PROBE.to_string(),
            marker: DEFAULT_MARKER.to_string(),
            initial_settle: Duration::from_secs(1),
            command_settle: Duration::from_secs(2),
            credential_settle: Duration::from_secs(2),
            probe_settle: Duration::from_secs(1),
            prompt_pattern: None,
        }
    }

    /// Zero every settle interval (used against scripted shells).
    pub fn without_delays(mut self) -> Self {
        self.initial_settle = Duration::ZERO;
        self.command_settle = Duration::ZERO;
        self.credential_settle = Duration::ZERO;
        self.probe_settle = Duration::ZERO;
        self
    }

    pub fn with_prompt_pattern(mut self, pattern: Regex) -> Self {
        self.prompt_pattern = Some(pattern);
        self
    }
}

/// Elevation data carried by an [`ElevatedSession`]
pub struct PrivilegeState {
    elevated_credential: Option<Zeroizing<String>>,
}

impl PrivilegeState {
    pub fn is_elevated(&self) -> bool {
        true
    }

    pub fn elevated_credential(&self) -> Option<&str> {
        self.elevated_credential.as_ref().map(|c| c.as_str())
    }
}

/// A session that has been elevated. Every command it runs requests a PTY,
/// whatever the caller asks for.
pub struct ElevatedSession<'a> {
    inner: &'a dyn CommandRunner,
    privilege: PrivilegeState,
}

impl<'a> ElevatedSession<'a> {
    pub fn privilege(&self) -> &PrivilegeState {
        &self.privilege
    }
}

#[async_trait]
impl CommandRunner for ElevatedSession<'_> {
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        _want_pty: bool,
    ) -> Result<CommandResult, SshError> {
        self.inner.execute(command, timeout, true).await
    }
}

/// Drives the interactive escalation protocol.
pub struct PrivilegeEscalator<'a> {
    config: EscalationConfig,
    sink: &'a dyn LogSink,
    state: EscalationState,
}

impl<'a> PrivilegeEscalator<'a> {
    pub fn new(config: EscalationConfig, sink: &'a dyn LogSink) -> Self {
        Self {
            config,
            sink,
            state: EscalationState::Unprivileged,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    /// Elevate `session`. On failure the session is left untouched and the
    /// escalator returns to `Unprivileged`.
    pub async fn escalate<'s, S>(
        &mut self,
        session: &'s S,
    ) -> Result<ElevatedSession<'s>, EscalationError>
    where
        S: ShellHost + CommandRunner,
    {
        const STEP: &str = "Switching to elevated user";

        if self.config.command.trim().is_empty() {
            return Err(EscalationError::EmptyCommand);
        }

        self.sink.step_start(STEP);
        self.state = EscalationState::Escalating;

        let outcome = match session.open_shell().await {
            Ok(mut shell) => {
                let outcome = self.run_protocol(shell.as_mut()).await;
                shell.close().await;
                outcome
            }
            Err(e) => Err(EscalationError::Shell(e)),
        };

        match outcome {
            Ok(()) => {
                self.state = EscalationState::Elevated;
                info!("[escalate] session elevated via '{}'", self.config.command);
                self.sink.info("Successfully switched to elevated user");
                self.sink.step_complete(STEP);

                let credential = (!self.config.credential.is_empty())
                    .then(|| self.config.credential.clone());
                Ok(ElevatedSession {
                    inner: session,
                    privilege: PrivilegeState {
                        elevated_credential: credential,
                    },
                })
            }
            Err(e) => {
                self.state = EscalationState::Unprivileged;
                self.sink
                    .error(&format!("Failed to switch to elevated user: {}", e));
                Err(e)
            }
        }
    }

    async fn run_protocol(&self, shell: &mut dyn InteractiveShell) -> Result<(), EscalationError> {
        tokio::time::sleep(self.config.initial_settle).await;
        let banner = shell.read_available(READ_IDLE).await?;
        debug!("[escalate] discarded {} bytes of banner", banner.len());

        shell.send_line(&self.config.command).await?;
        self.wait_for_prompt(shell).await?;

        if !self.config.credential.is_empty() {
            shell.send_line(&self.config.credential).await?;
            tokio::time::sleep(self.config.credential_settle).await;
        }
        // Drop everything up to here so echoed input cannot match the marker.
        shell.read_available(READ_IDLE).await?;

        shell.send_line(&self.config.probe).await?;
        tokio::time::sleep(self.config.probe_settle).await;
        let output = shell.read_available(READ_IDLE).await?;

        if probe_confirms(&output, &self.config.probe, &self.config.marker) {
            Ok(())
        } else {
            Err(EscalationError::ProbeMismatch {
                marker: self.config.marker.clone(),
                output: output.trim().to_string(),
            })
        }
    }

    /// Sleep out the command settle interval, or return early once the
    /// prompt pattern appears.
    async fn wait_for_prompt(&self, shell: &mut dyn InteractiveShell) -> Result<(), SshError> {
        let Some(pattern) = &self.config.prompt_pattern else {
            tokio::time::sleep(self.config.command_settle).await;
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + self.config.command_settle;
        let mut seen = String::new();
        loop {
            seen.push_str(&shell.read_available(READ_IDLE).await?);
            if pattern.is_match(&seen) {
                debug!("[escalate] prompt detected");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                debug!("[escalate] prompt not seen within settle interval");
                return Ok(());
            }
        }
    }
}

/// Whether the probe output (minus the echoed probe line) contains `marker`.
fn probe_confirms(output: &str, probe: &str, marker: &str) -> bool {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(probe))
        .any(|line| line.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, RecordingSink};
    use crate::test_support::{FakeRemote, FakeShellHost};

    /// Shell host and command runner in one, like a real session.
    struct Host {
        shell: FakeShellHost,
        remote: FakeRemote,
    }

    #[async_trait]
    impl ShellHost for Host {
        async fn open_shell(&self) -> Result<Box<dyn InteractiveShell>, SshError> {
            self.shell.open_shell().await
        }
    }

    #[async_trait]
    impl CommandRunner for Host {
        async fn execute(
            &self,
            command: &str,
            timeout: Duration,
            want_pty: bool,
        ) -> Result<CommandResult, SshError> {
            self.remote.execute(command, timeout, want_pty).await
        }
    }

    fn host(shell: FakeShellHost) -> Host {
        Host {
            shell,
            remote: FakeRemote::new(),
        }
    }

    #[tokio::test]
    async fn test_marker_in_probe_output_elevates() {
        let host = host(
            FakeShellHost::new("Last login: today\r\n$ ")
                .on_line("su -", "Password: ")
                .on_line("whoami", "root\r\n# "),
        );
        let sink = RecordingSink::new();
        let mut escalator =
            PrivilegeEscalator::new(EscalationConfig::new("su -", "toor").without_delays(), &sink);

        let elevated = escalator.escalate(&host).await.unwrap();

        assert_eq!(escalator.state(), EscalationState::Elevated);
        assert!(elevated.privilege().is_elevated());
        assert_eq!(elevated.privilege().elevated_credential(), Some("toor"));
        assert_eq!(host.shell.sent(), vec!["su -", "toor", "whoami"]);
        assert_eq!(host.shell.closed(), 1);
        assert!(sink.contains(LogLevel::Info, "Completed step: Switching to elevated user"));
    }

    #[tokio::test]
    async fn test_auth_failure_output_does_not_elevate() {
        let host = host(
            FakeShellHost::new("$ ")
                .on_line("su -", "Password: ")
                .on_line("toor", "su: Authentication failure\r\n$ ")
                .on_line("whoami", "tester\r\n$ "),
        );
        let sink = RecordingSink::new();
        let mut escalator =
            PrivilegeEscalator::new(EscalationConfig::new("su -", "toor").without_delays(), &sink);

        let err = escalator.escalate(&host).await.err().unwrap();

        assert!(matches!(err, EscalationError::ProbeMismatch { .. }));
        assert_eq!(escalator.state(), EscalationState::Unprivileged);
        assert_eq!(host.shell.closed(), 1);
        assert!(sink.contains(LogLevel::Error, "Failed to switch to elevated user"));
    }

    #[tokio::test]
    async fn test_empty_probe_output_does_not_elevate() {
        let host = host(FakeShellHost::new(""));
        let sink = RecordingSink::new();
        let mut escalator =
            PrivilegeEscalator::new(EscalationConfig::new("su -", "").without_delays(), &sink);

        assert!(escalator.escalate(&host).await.is_err());
        // No credential configured: nothing typed between command and probe.
        assert_eq!(host.shell.sent(), vec!["su -", "whoami"]);
    }

    #[tokio::test]
    async fn test_echoed_command_cannot_fake_the_marker() {
        // `su - root` echoes the word root; only the probe reply counts.
        let host = host(
            FakeShellHost::new("$ ")
                .on_line("su - root", "Password: ")
                .on_line("whoami", "tester\r\n"),
        );
        let sink = RecordingSink::new();
        let mut escalator = PrivilegeEscalator::new(
            EscalationConfig::new("su - root", "pw").without_delays(),
            &sink,
        );

        assert!(escalator.escalate(&host).await.is_err());
    }

    #[tokio::test]
    async fn test_shell_open_failure_leaves_state_unprivileged() {
        let host = host(FakeShellHost::failing());
        let sink = RecordingSink::new();
        let mut escalator =
            PrivilegeEscalator::new(EscalationConfig::new("su -", "pw").without_delays(), &sink);

        let err = escalator.escalate(&host).await.err().unwrap();
        assert!(matches!(err, EscalationError::Shell(_)));
        assert_eq!(escalator.state(), EscalationState::Unprivileged);
    }

    #[tokio::test]
    async fn test_prompt_pattern_short_circuits_wait() {
        let host = host(
            FakeShellHost::new("$ ")
                .on_line("sudo -i", "[sudo] password for tester: ")
                .on_line("whoami", "root\r\n"),
        );
        let sink = RecordingSink::new();
        let mut config = EscalationConfig::new("sudo -i", "pw").without_delays();
        config.command_settle = Duration::from_secs(30);
        let config = config.with_prompt_pattern(Regex::new(r"(?i)password").unwrap());
        let mut escalator = PrivilegeEscalator::new(config, &sink);

        let started = std::time::Instant::now();
        escalator.escalate(&host).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_elevated_session_always_requests_pty() {
        let host = host(FakeShellHost::new("").on_line("whoami", "root\n"));
        let sink = RecordingSink::new();
        let mut escalator =
            PrivilegeEscalator::new(EscalationConfig::new("su -", "pw").without_delays(), &sink);
        let elevated = escalator.escalate(&host).await.unwrap();

        elevated
            .execute("systemctl restart app", Duration::from_secs(1), false)
            .await
            .unwrap();
        host.execute("id", Duration::from_secs(1), false)
            .await
            .unwrap();

        assert_eq!(host.remote.pty_flags(), vec![true, false]);
    }

    #[test]
    fn test_probe_confirms() {
        assert!(probe_confirms("whoami\r\nroot\r\n# ", "whoami", "root"));
        assert!(!probe_confirms("whoami\r\ntester\r\n$ ", "whoami", "root"));
        assert!(!probe_confirms("", "whoami", "root"));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let host = host(FakeShellHost::new(""));
        let sink = RecordingSink::new();
        let mut escalator = PrivilegeEscalator::new(EscalationConfig::new("  ", "pw"), &sink);
        assert!(matches!(
            escalator.escalate(&host).await.err(),
            Some(EscalationError::EmptyCommand)
        ));
        assert_eq!(host.shell.opened(), 0);
    }
}
