//! In-memory stand-ins for the SSH layer, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use crate::session::CommandResult;
use crate::ssh::{
    CommandRunner, InteractiveShell, RemoteFs, RemoteWriter, ShellHost, SshError,
};

#[derive(Default)]
struct FsState {
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    chunks: HashMap<String, Vec<usize>>,
}

/// Fake host: an in-memory filesystem plus scripted command responses.
///
/// Every filesystem write and command is appended to a shared event log so
/// tests can assert ordering across both channels.
pub(crate) struct FakeRemote {
    fs: Arc<Mutex<FsState>>,
    denied_dirs: Vec<String>,
    failing_uploads: Vec<String>,
    responses: Vec<(String, CommandResult)>,
    timeouts: Vec<String>,
    commands: Mutex<Vec<(String, bool)>>,
    events: Arc<Mutex<Vec<String>>>,
    shell: Option<FakeShellHost>,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        let mut state = FsState::default();
        state.dirs.insert("/".to_string());
        Self {
            fs: Arc::new(Mutex::new(state)),
            denied_dirs: Vec::new(),
            failing_uploads: Vec::new(),
            responses: Vec::new(),
            timeouts: Vec::new(),
            commands: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            shell: None,
        }
    }

    /// Serve interactive shells from `host`; without one, opening a shell
    /// fails.
    pub(crate) fn with_shell(mut self, host: FakeShellHost) -> Self {
        self.shell = Some(host);
        self
    }

    /// Refuse to create `dir` and anything below it.
    pub(crate) fn deny_mkdir(mut self, dir: &str) -> Self {
        self.denied_dirs.push(dir.to_string());
        self
    }

    /// Refuse to open remote files whose path contains `needle`.
    pub(crate) fn fail_upload(mut self, needle: &str) -> Self {
        self.failing_uploads.push(needle.to_string());
        self
    }

    /// Output of `kubectl get pods`.
    pub(crate) fn with_pods(self, listing: &str) -> Self {
        self.respond("get pods", CommandResult::ok(listing))
    }

    pub(crate) fn fail_command(self, needle: &str, exit_code: i32, stderr: &str) -> Self {
        self.respond(needle, CommandResult::failed(exit_code, stderr))
    }

    /// Reply with `result` to commands containing `needle`. The first
    /// matching rule wins; unmatched commands succeed with empty output.
    pub(crate) fn respond(mut self, needle: &str, result: CommandResult) -> Self {
        self.responses.push((needle.to_string(), result));
        self
    }

    /// Commands containing `needle` fail with `SshError::Timeout`.
    pub(crate) fn time_out(mut self, needle: &str) -> Self {
        self.timeouts.push(needle.to_string());
        self
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    /// PTY flag of every executed command, in order
    pub(crate) fn pty_flags(&self) -> Vec<bool> {
        self.commands.lock().iter().map(|(_, pty)| *pty).collect()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn chunk_sizes(&self, path: &str) -> Vec<usize> {
        self.fs.lock().chunks.get(path).cloned().unwrap_or_default()
    }
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

#[async_trait]
impl CommandRunner for FakeRemote {
    async fn execute(
        &self,
        command: &str,
        timeout: Duration,
        want_pty: bool,
    ) -> Result<CommandResult, SshError> {
        self.commands.lock().push((command.to_string(), want_pty));
        self.events.lock().push(format!("exec {}", command));

        if self.timeouts.iter().any(|n| command.contains(n.as_str())) {
            return Err(SshError::Timeout(timeout));
        }

        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RemoteFs for FakeRemote {
    async fn exists(&self, path: &str) -> Result<bool, SshError> {
        let fs = self.fs.lock();
        Ok(fs.dirs.contains(path) || fs.files.contains_key(path))
    }

    async fn create_dir(&self, path: &str) -> Result<(), SshError> {
        if self.denied_dirs.iter().any(|d| path.starts_with(d.as_str())) {
            return Err(SshError::Sftp(format!("Permission denied: {}", path)));
        }
        let mut fs = self.fs.lock();
        if !fs.dirs.contains(&parent_of(path)) {
            return Err(SshError::Sftp(format!("No such file: {}", path)));
        }
        fs.dirs.insert(path.to_string());
        self.events.lock().push(format!("mkdir {}", path));
        Ok(())
    }

    async fn create_file(&self, path: &str) -> Result<RemoteWriter, SshError> {
        if self.failing_uploads.iter().any(|n| path.contains(n.as_str())) {
            return Err(SshError::Sftp(format!("Failure: {}", path)));
        }
        {
            let mut fs = self.fs.lock();
            if !fs.dirs.contains(&parent_of(path)) {
                return Err(SshError::Sftp(format!("No such file: {}", path)));
            }
            fs.files.insert(path.to_string(), Vec::new());
            fs.chunks.insert(path.to_string(), Vec::new());
        }
        self.events.lock().push(format!("create {}", path));
        Ok(Box::new(FakeWriter {
            path: path.to_string(),
            fs: self.fs.clone(),
            events: self.events.clone(),
        }))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        self.fs
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SshError::Sftp(format!("No such file: {}", path)))
    }
}

#[async_trait]
impl ShellHost for FakeRemote {
    async fn open_shell(&self) -> Result<Box<dyn InteractiveShell>, SshError> {
        match &self.shell {
            Some(host) => host.open_shell().await,
            None => Err(SshError::Channel("shell not available".to_string())),
        }
    }
}

struct FakeWriter {
    path: String,
    fs: Arc<Mutex<FsState>>,
    events: Arc<Mutex<Vec<String>>>,
}

impl AsyncWrite for FakeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut fs = self.fs.lock();
        if let Some(data) = fs.files.get_mut(&self.path) {
            data.extend_from_slice(buf);
        }
        if let Some(chunks) = fs.chunks.get_mut(&self.path) {
            chunks.push(buf.len());
        }
        self.events
            .lock()
            .push(format!("write {} {}", self.path, buf.len()));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Scripted interactive shell: each sent line that contains a rule's needle
/// queues that rule's output.
#[derive(Clone, Default)]
pub(crate) struct FakeShellHost {
    banner: String,
    rules: Vec<(String, String)>,
    sent: Arc<Mutex<Vec<String>>>,
    opened: Arc<Mutex<usize>>,
    closed: Arc<Mutex<usize>>,
    fail_open: bool,
}

impl FakeShellHost {
    pub(crate) fn new(banner: &str) -> Self {
        Self {
            banner: banner.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn on_line(mut self, needle: &str, output: &str) -> Self {
        self.rules.push((needle.to_string(), output.to_string()));
        self
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn opened(&self) -> usize {
        *self.opened.lock()
    }

    pub(crate) fn closed(&self) -> usize {
        *self.closed.lock()
    }
}

#[async_trait]
impl ShellHost for FakeShellHost {
    async fn open_shell(&self) -> Result<Box<dyn InteractiveShell>, SshError> {
        if self.fail_open {
            return Err(SshError::Channel("channel open refused".to_string()));
        }
        *self.opened.lock() += 1;
        Ok(Box::new(FakeShell {
            host: self.clone(),
            pending: self.banner.clone(),
        }))
    }
}

struct FakeShell {
    host: FakeShellHost,
    pending: String,
}

#[async_trait]
impl InteractiveShell for FakeShell {
    async fn send_line(&mut self, line: &str) -> Result<(), SshError> {
        self.host.sent.lock().push(line.to_string());
        // Echo like a PTY does.
        self.pending.push_str(line);
        self.pending.push_str("\r\n");
        if let Some((_, output)) = self
            .host
            .rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
        {
            self.pending.push_str(output);
        }
        Ok(())
    }

    async fn read_available(&mut self, _idle: Duration) -> Result<String, SshError> {
        Ok(std::mem::take(&mut self.pending))
    }

    async fn close(&mut self) {
        *self.host.closed.lock() += 1;
    }
}
