//! End-to-end test run
//!
//! connect → escalate (optional) → container pre-flight → deploy files →
//! restart service → run test script → save session log → disconnect.
//!
//! Every step before the test script is fail-fast. The session log is saved
//! and the SSH connection closed whatever the outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, RunConfig};
use crate::deploy::{DeploymentPipeline, DeploymentReport, StageFailure};
use crate::logging::{save_session_log, LogSink};
use crate::privilege::{EscalationError, PrivilegeEscalator};
use crate::runner::{ProcessError, ScriptOutcome, ScriptRunner};
use crate::session::CommandResult;
use crate::ssh::{CommandRunner, RemoteFs, RemoteSession, ShellHost, SshError};
use crate::transfer::{kubectl, FileTransferEngine, TransferError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection failed: {0}")]
    Connect(#[from] SshError),

    #[error("Failed to obtain root privileges: {0}")]
    Escalation(#[from] EscalationError),

    #[error("Container check failed: {0}")]
    Containers(#[from] TransferError),

    #[error(transparent)]
    Deploy(#[from] StageFailure),

    #[error("Service restart failed: {0}")]
    Restart(String),

    #[error("Test script error: {0}")]
    Script(#[from] ProcessError),
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub elevated: bool,
    pub containers: Vec<String>,
    pub deployment: DeploymentReport,
    pub restart: CommandResult,
    pub script: ScriptOutcome,
}

impl WorkflowReport {
    /// Deployment and restart went through and the script exited 0.
    pub fn success(&self) -> bool {
        self.script.success
    }
}

/// Run `command` through `runner`; a non-zero exit is a failure.
pub async fn restart_service(
    runner: &dyn CommandRunner,
    command: &str,
    timeout: Duration,
    sink: &dyn LogSink,
) -> Result<CommandResult, WorkflowError> {
    const STEP: &str = "Restarting service";
    sink.step_start(STEP);
    sink.command_output("restart command", command);

    let result = runner
        .execute(command, timeout, false)
        .await
        .map_err(|e| WorkflowError::Restart(e.to_string()))?;

    if !result.stdout.trim().is_empty() {
        sink.command_output(command, &result.stdout);
    }
    if result.success() {
        sink.info("Service restart completed successfully");
        sink.step_complete(STEP);
        Ok(result)
    } else {
        sink.error("Service restart failed");
        // Under a PTY the error text arrives on stdout.
        let output = [&result.stderr, &result.stdout]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or_default();
        if !output.is_empty() {
            sink.error(&format!("Error output: {}", output));
        }
        Err(WorkflowError::Restart(format!(
            "exit code {}: {}",
            result.exit_code, output
        )))
    }
}

/// One configured run.
pub struct Workflow {
    run_id: String,
    config: RunConfig,
    sink: Arc<dyn LogSink>,
    log_file: Option<PathBuf>,
    scripts: ScriptRunner,
}

impl Workflow {
    /// `log_file` is the tracing output of this run; it is copied into the
    /// configured log directory at the end.
    pub fn new(config: RunConfig, sink: Arc<dyn LogSink>, log_file: Option<PathBuf>) -> Self {
        let scripts = ScriptRunner::new(sink.clone()).with_grace_period(config.stop_grace());
        Self {
            run_id: Uuid::new_v4().to_string(),
            config,
            sink,
            log_file,
            scripts,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Handle used to stop the test script from outside (Ctrl-C).
    pub fn script_runner(&self) -> ScriptRunner {
        self.scripts.clone()
    }

    /// Connect, run every step and disconnect.
    pub async fn run(&self) -> Result<WorkflowReport, WorkflowError> {
        let mut session = RemoteSession::new(self.config.session_config());
        self.sink.step_start("Connecting to remote host");

        let result = match session.connect().await {
            Ok(()) => {
                self.sink.info(&format!(
                    "Connected to {}",
                    session.config().display_string()
                ));
                self.sink.step_complete("Connecting to remote host");
                self.run_on(&session).await
            }
            Err(e) => {
                self.sink.error(&format!("Failed to connect: {}", e));
                Err(WorkflowError::Connect(e))
            }
        };

        session.disconnect().await;
        self.sink.info("Disconnected from remote host");
        self.save_log();
        result
    }

    /// Every step after connecting, against any remote.
    pub async fn run_on<S>(&self, remote: &S) -> Result<WorkflowReport, WorkflowError>
    where
        S: CommandRunner + RemoteFs + ShellHost,
    {
        let started_at = Local::now();
        let sink: &dyn LogSink = &*self.sink;
        let config = &self.config;
        info!("[workflow] run {} started", self.run_id);

        let files = config.file_descriptors()?;
        let target = config.deploy_target();

        let escalation = config.escalation_config()?;
        let elevated = escalation.is_some();

        let elevated_session;
        let runner: &dyn CommandRunner = match escalation {
            Some(escalation) => {
                let mut escalator = PrivilegeEscalator::new(escalation, sink);
                elevated_session = escalator.escalate(remote).await?;
                &elevated_session
            }
            None => remote,
        };

        let engine = FileTransferEngine::new(remote, runner, sink)
            .with_chunk_size(config.tool.chunk_size)
            .with_command_timeout(config.command_timeout());

        let containers = engine
            .list_containers(&target.namespace, &target.container_selector)
            .await?;
        let Some(first) = containers.first() else {
            return Err(WorkflowError::Containers(TransferError::ContainerNotFound {
                namespace: target.namespace.clone(),
                selector: target.container_selector.clone(),
            }));
        };
        if let Some(pod) = first.split_whitespace().next() {
            sink.info(&format!(
                "Enter the container with: {}",
                kubectl::entry_command(&target.namespace, pod)
            ));
        }

        let deployment = DeploymentPipeline::new(&engine, target, sink)
            .run(&files)
            .await?;

        let restart = restart_service(
            runner,
            &config.environment.restart_command,
            config.restart_timeout(),
            sink,
        )
        .await?;

        sink.step_start("Running test script");
        let script = self
            .scripts
            .run(&config.test_script.script_path, &config.test_script.parameters)
            .await?;
        if script.success {
            sink.step_complete("Running test script");
        }

        let report = WorkflowReport {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Local::now(),
            elevated,
            containers,
            deployment,
            restart,
            script,
        };
        info!(
            "[workflow] finished: {} file(s), script exit {}",
            report.deployment.files.len(),
            report.script.exit_code
        );
        Ok(report)
    }

    fn save_log(&self) {
        match save_session_log(self.log_file.as_deref(), &self.config.tool.log_path) {
            Ok(path) => self
                .sink
                .info(&format!("Log saved to: {}", path.display())),
            Err(e) => {
                warn!("[workflow] could not save session log: {}", e);
                self.sink.warning(&format!("Failed to save log: {}", e));
            }
        }
    }
}
