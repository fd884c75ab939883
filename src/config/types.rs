//! Configuration Types
//!
//! The JSON run file: files to deploy, the target environment, the test
//! script and tool tuning. Only `files`, `environment` and `test_script` are
//! required; everything under `tool` has defaults.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::deploy::DEFAULT_PERMISSIONS;
use crate::privilege::DEFAULT_MARKER;
use crate::session::DEFAULT_PORT;
use crate::transfer::DEFAULT_CHUNK_SIZE;

/// One file to deploy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub local_path: PathBuf,
    pub container_path: String,
    /// chmod mode; blank means 755
    #[serde(default = "default_permissions")]
    pub permissions: String,
}

/// Target host, cluster coordinates and credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(skip_serializing)]
    pub password: Zeroizing<String>,

    /// Escalation command such as `su -`; blank disables escalation
    #[serde(default)]
    pub root_command: String,

    #[serde(default, skip_serializing)]
    pub root_password: Zeroizing<String>,

    /// Remote directory used as the drop zone before `kubectl cp`
    pub staging_path: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Substring picking the pod out of `kubectl get pods`
    #[serde(default)]
    pub container_filter: String,

    pub restart_command: String,
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("root_command", &self.root_command)
            .field("root_password", &"***")
            .field("staging_path", &self.staging_path)
            .field("namespace", &self.namespace)
            .field("container_filter", &self.container_filter)
            .field("restart_command", &self.restart_command)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestScriptConfig {
    pub script_path: PathBuf,

    /// Appended to the script invocation as-is
    #[serde(default)]
    pub parameters: String,
}

/// Escalation timing and detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscalationSettings {
    pub initial_settle_ms: u64,
    pub command_settle_ms: u64,
    pub credential_settle_ms: u64,
    pub probe_settle_ms: u64,
    pub marker: String,
    /// Regex matched against the output after the escalation command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_pattern: Option<String>,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            initial_settle_ms: 1000,
            command_settle_ms: 2000,
            credential_settle_ms: 2000,
            probe_settle_ms: 1000,
            marker: DEFAULT_MARKER.to_string(),
            prompt_pattern: None,
        }
    }
}

/// Tool-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    /// Directory the session log is saved to
    pub log_path: PathBuf,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub restart_timeout_secs: u64,
    /// Upload chunk size in bytes
    pub chunk_size: usize,
    /// Seconds between SIGTERM and SIGKILL when stopping the test script
    pub stop_grace_secs: u64,
    pub escalation: EscalationSettings,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs"),
            connect_timeout_secs: 30,
            command_timeout_secs: 60,
            restart_timeout_secs: 120,
            chunk_size: DEFAULT_CHUNK_SIZE,
            stop_grace_secs: 10,
            escalation: EscalationSettings::default(),
        }
    }
}

/// Root of the run file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub files: Vec<FileEntry>,
    pub environment: EnvironmentConfig,
    pub test_script: TestScriptConfig,
    #[serde(default)]
    pub tool: ToolConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_permissions() -> String {
    DEFAULT_PERMISSIONS.to_string()
}
