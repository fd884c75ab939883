//! Local test script supervisor
//!
//! Runs one script at a time as `sh -c 'exec 2>&1; <script> <parameters>'`
//! in a fresh process group, so that stopping it reaches every child the
//! script spawned. `stop()` sends SIGTERM to the group, waits for the grace
//! period and then sends SIGKILL.

mod validate;

pub use validate::{validate, ScriptKind};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::logging::LogSink;
use crate::transfer::kubectl::shell_quote;

/// Time between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How long output is still read once the script has exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on waiting for the reap after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Script validation failed: {0}")]
    Validation(String),

    #[error("Failed to start script: {0}")]
    Launch(String),

    #[error("A test script is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Result of one script run
#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutcome {
    pub exit_code: i32,
    pub success: bool,
    /// Ended by [`ScriptRunner::stop`]
    pub stopped: bool,
    pub lines: Vec<String>,
}

pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct ActiveProcess {
    pid: u32,
    stop_requested: bool,
}

struct Shared {
    running: watch::Sender<bool>,
    active: Mutex<Option<ActiveProcess>>,
    state: Mutex<ProcessState>,
}

/// Launches and supervises the test script. Cheap to clone; clones share
/// the same process slot.
#[derive(Clone)]
pub struct ScriptRunner {
    sink: Arc<dyn LogSink>,
    on_output: Option<OutputCallback>,
    grace_period: Duration,
    shared: Arc<Shared>,
}

impl ScriptRunner {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            sink,
            on_output: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            shared: Arc::new(Shared {
                running,
                active: Mutex::new(None),
                state: Mutex::new(ProcessState::Idle),
            }),
        }
    }

    /// Receive every output line as it is read.
    pub fn with_output_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_output = Some(Arc::new(callback));
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    pub fn state(&self) -> ProcessState {
        *self.shared.state.lock()
    }

    pub fn validate(&self, script: &Path) -> Result<ScriptKind, ProcessError> {
        validate(script)
    }

    /// Return a finished runner to [`ProcessState::Idle`] once its result
    /// has been observed. Has no effect while a script is running.
    pub fn reset(&self) {
        if !self.is_running() {
            *self.shared.state.lock() = ProcessState::Idle;
        }
    }

    /// Run `script` to completion.
    ///
    /// `parameters` is appended verbatim and word-split by `sh`.
    pub async fn run(&self, script: &Path, parameters: &str) -> Result<ScriptOutcome, ProcessError> {
        // Claim the slot atomically.
        let claimed = self.shared.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !claimed {
            self.sink.warning("A test script is already running");
            return Err(ProcessError::AlreadyRunning);
        }

        let result = self.launch(script, parameters).await;

        *self.shared.state.lock() = match &result {
            Ok(outcome) if outcome.stopped => ProcessState::Stopped,
            Ok(outcome) if outcome.success => ProcessState::Completed,
            _ => ProcessState::Failed,
        };
        self.shared.active.lock().take();
        self.shared.running.send_replace(false);
        result
    }

    async fn launch(&self, script: &Path, parameters: &str) -> Result<ScriptOutcome, ProcessError> {
        let path = script.to_path_buf();
        let validated = tokio::task::spawn_blocking(move || validate(&path))
            .await
            .unwrap_or_else(|e| Err(ProcessError::Validation(e.to_string())));
        if let Err(e) = validated {
            self.sink.error(&e.to_string());
            return Err(e);
        }
        make_executable(script).await;
        self.supervise(script, parameters).await
    }

    async fn supervise(&self, script: &Path, parameters: &str) -> Result<ScriptOutcome, ProcessError> {
        let command_line = if parameters.trim().is_empty() {
            shell_quote(&script.to_string_lossy())
        } else {
            format!("{} {}", shell_quote(&script.to_string_lossy()), parameters.trim())
        };
        self.sink
            .info(&format!("Executing test script: {}", command_line));

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("exec 2>&1; {}", command_line))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            let err = ProcessError::Launch(e.to_string());
            self.sink.error(&err.to_string());
            err
        })?;

        let pid = child.id().unwrap_or_default();
        *self.shared.active.lock() = Some(ActiveProcess {
            pid,
            stop_requested: false,
        });
        *self.shared.state.lock() = ProcessState::Running;
        debug!("[runner] started pid {}", pid);

        let mut lines = Vec::new();
        let stdout = child.stdout.take();
        let status = {
            let drain = self.read_lines(stdout, &mut lines);
            tokio::pin!(drain);
            tokio::select! {
                read = &mut drain => {
                    read?;
                    child.wait().await?
                }
                status = child.wait() => {
                    // A process outside the group can keep the pipe open
                    // after the script itself has been reaped.
                    let status = status?;
                    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut drain).await {
                        Ok(read) => read?,
                        Err(_) => warn!(
                            "[runner] output still open {:?} after pid {} exited, detaching",
                            OUTPUT_DRAIN_TIMEOUT, pid
                        ),
                    }
                    status
                }
            }
        };

        let exit_code = exit_code(&status);
        let stopped = self
            .shared
            .active
            .lock()
            .as_ref()
            .is_some_and(|a| a.stop_requested);

        self.sink.command_output(&command_line, &lines.join("\n"));
        if stopped {
            self.sink.warning("Test script was stopped");
        } else if status.success() {
            self.sink.info("Test script completed successfully");
        } else {
            self.sink
                .error(&format!("Test script failed with exit code {}", exit_code));
        }

        Ok(ScriptOutcome {
            exit_code,
            success: status.success(),
            stopped,
            lines,
        })
    }

    /// Read merged output line by line until end of file.
    async fn read_lines(
        &self,
        stdout: Option<tokio::process::ChildStdout>,
        lines: &mut Vec<String>,
    ) -> std::io::Result<()> {
        let Some(stdout) = stdout else {
            return Ok(());
        };
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            info!("[runner] {}", line);
            if let Some(callback) = &self.on_output {
                callback(&line);
            }
            lines.push(line);
        }
    }

    /// Run on a background task; `on_complete` receives the success flag
    /// exactly once, after the process has been reaped.
    pub fn run_async(
        &self,
        script: PathBuf,
        parameters: String,
        on_complete: impl FnOnce(bool) + Send + 'static,
    ) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move {
            let success = match runner.run(&script, &parameters).await {
                Ok(outcome) => outcome.success,
                Err(e) => {
                    warn!("[runner] background run failed: {}", e);
                    false
                }
            };
            on_complete(success);
        })
    }

    /// Stop the active script. Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let pid = self.shared.active.lock().as_mut().map(|process| {
            process.stop_requested = true;
            process.pid
        });
        let Some(pid) = pid else {
            self.sink.warning("No test script is running");
            return false;
        };

        self.sink.info("Stopping test script");
        let mut running = self.shared.running.subscribe();

        signal_group(pid, Signal::Term);
        let exited = tokio::time::timeout(self.grace_period, running.wait_for(|r| !*r))
            .await
            .is_ok();

        if !exited {
            self.sink.warning(&format!(
                "Test script ignored SIGTERM for {:?}, killing",
                self.grace_period
            ));
            signal_group(pid, Signal::Kill);
            if tokio::time::timeout(KILL_WAIT, running.wait_for(|r| !*r))
                .await
                .is_err()
            {
                warn!("[runner] pid {} not reaped {:?} after SIGKILL", pid, KILL_WAIT);
            }
        }

        self.sink.info("Test script stopped");
        true
    }
}

async fn make_executable(script: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let result = async {
            let mut perms = tokio::fs::metadata(script).await?.permissions();
            let mode = perms.mode();
            if mode & 0o111 != 0o111 {
                perms.set_mode(mode | 0o111);
                tokio::fs::set_permissions(script, perms).await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            warn!("[runner] could not mark {} executable: {}", script.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = script;
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let sig = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), sig) {
        // ESRCH: the group already exited.
        debug!("[runner] killpg({}, {:?}) failed: {}", pid, sig, e);
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32, signal: Signal) {
    warn!("[runner] cannot send {:?} to {}: process groups unsupported", signal, pid);
}
