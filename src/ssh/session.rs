//! Remote Session: one authenticated SSH connection plus its SFTP channel.
//!
//! # Lifecycle
//!
//! - [`RemoteSession::new`] creates a disconnected session
//! - [`RemoteSession::connect`] performs the handshake, password auth and
//!   opens the SFTP subsystem
//! - [`RemoteSession::disconnect`] closes SFTP, then the transport; it is
//!   safe to call any number of times
//!
//! Commands are executed on a fresh session channel each. Executions on the
//! same `RemoteSession` are serialized: no two commands share the transport
//! at the same time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::client::AcceptAnyHostKey;
use super::shell::PtyShell;
use super::{CommandRunner, InteractiveShell, RemoteFs, RemoteWriter, ShellHost, SshError};
use crate::session::{
    CommandResult, ConnectionState, ConnectionStatus, SessionConfig, MISSING_EXIT_STATUS,
};

/// Terminal type requested for PTY-backed executions.
const PTY_TERM: &str = "xterm";
const PTY_COLS: u32 = 200;
const PTY_ROWS: u32 = 50;

/// One SSH connection to the deployment host.
pub struct RemoteSession {
    config: SessionConfig,
    state: ConnectionStatus,
    handle: Option<Handle<AcceptAnyHostKey>>,
    sftp: Option<SftpSession>,
    /// Serializes command executions on this transport.
    exec_lock: Mutex<()>,
}

impl RemoteSession {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: ConnectionStatus::new(),
            handle: None,
            sftp: None,
            exec_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected() && self.handle.is_some()
    }

    /// Why the last connect attempt failed
    pub fn last_error(&self) -> Option<&str> {
        self.state.error()
    }

    /// Establish the transport, authenticate and open the SFTP channel.
    ///
    /// Calling this on an already connected session is a no-op. On failure
    /// the session keeps no transport and moves to `Error`.
    pub async fn connect(&mut self) -> Result<(), SshError> {
        if self.is_connected() {
            debug!("[ssh-session] Already connected to {}", self.config.display_string());
            return Ok(());
        }

        self.state.connecting();

        match self.establish().await {
            Ok((handle, sftp)) => {
                self.handle = Some(handle);
                self.sftp = Some(sftp);
                self.state.connected();
                info!(
                    "[ssh-session] Connected to {}",
                    self.config.display_string()
                );
                Ok(())
            }
            Err(e) => {
                self.state.failed(e.to_string());
                warn!(
                    "[ssh-session] Connection to {} failed: {}",
                    self.config.display_string(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(Handle<AcceptAnyHostKey>, SftpSession), SshError> {
        let host = self.config.host.clone();
        let handler = AcceptAnyHostKey { host: host.clone() };
        let ssh_config = Arc::new(client::Config::default());

        let connecting = client::connect(ssh_config, (host.as_str(), self.config.port), handler);
        let mut handle = tokio::time::timeout(self.config.connect_timeout, connecting)
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
            .map_err(|e| SshError::Connection {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let auth = handle
            .authenticate_password(
                self.config.username.clone(),
                self.config.password.as_str().to_owned(),
            )
            .await
            .map_err(|e| SshError::Connection {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        if !auth.success() {
            return Err(SshError::AuthFailed {
                user: self.config.username.clone(),
                host,
            });
        }

        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;

        Ok((handle, sftp))
    }

    /// Close the SFTP channel, then the transport. Never fails.
    pub async fn disconnect(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                debug!("[ssh-session] SFTP close: {}", e);
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("[ssh-session] Disconnect: {}", e);
            }
            info!(
                "[ssh-session] Disconnected from {} after {:?} in state {}",
                self.config.display_string(),
                self.state.time_in_state(),
                self.state.state()
            );
        }

        self.state.disconnected();
    }

    fn handle(&self) -> Result<&Handle<AcceptAnyHostKey>, SshError> {
        self.handle.as_ref().ok_or(SshError::NotConnected)
    }

    fn sftp(&self) -> Result<&SftpSession, SshError> {
        self.sftp.as_ref().ok_or(SshError::NotConnected)
    }

    async fn run_channel(
        handle: &Handle<AcceptAnyHostKey>,
        command: &str,
        want_pty: bool,
    ) -> Result<CommandResult, SshError> {
        let mut channel = handle.channel_open_session().await?;

        if want_pty {
            channel
                .request_pty(false, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
                .await?;
        }
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        // ExitStatus may arrive before or after Eof; read until the channel
        // is gone.
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status as i32);
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let exit_code = exit_code.unwrap_or_else(|| {
            warn!("[ssh-session] No exit status for '{}'", command);
            MISSING_EXIT_STATUS
        });

        Ok(CommandResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CommandRunner for RemoteSession {
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        want_pty: bool,
    ) -> Result<CommandResult, SshError> {
        let handle = self.handle()?;
        let _guard = self.exec_lock.lock().await;

        debug!("[ssh-session] exec (pty={}): {}", want_pty, command);

        tokio::time::timeout(timeout, Self::run_channel(handle, command, want_pty))
            .await
            .map_err(|_| SshError::Timeout(timeout))?
    }
}

#[async_trait]
impl RemoteFs for RemoteSession {
    async fn exists(&self, path: &str) -> Result<bool, SshError> {
        Ok(self.sftp()?.try_exists(path).await?)
    }

    async fn create_dir(&self, path: &str) -> Result<(), SshError> {
        Ok(self.sftp()?.create_dir(path).await?)
    }

    async fn create_file(&self, path: &str) -> Result<RemoteWriter, SshError> {
        let file = self.sftp()?.create(path).await?;
        Ok(Box::new(file))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        Ok(self.sftp()?.read(path).await?)
    }
}

#[async_trait]
impl ShellHost for RemoteSession {
    async fn open_shell(&self) -> Result<Box<dyn InteractiveShell>, SshError> {
        let handle = self.handle()?;
        let channel = handle.channel_open_session().await?;
        channel
            .request_pty(false, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;
        Ok(Box::new(PtyShell::new(channel)))
    }
}
