//! Configuration Management Module
//!
//! Loads the JSON run file, checks it the way an operator form would, and
//! turns it into the typed parameters of each layer. The file is never
//! written back.

pub mod types;

pub use types::{
    EnvironmentConfig, EscalationSettings, FileEntry, RunConfig, TestScriptConfig, ToolConfig,
};

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::deploy::{DeployTarget, DescriptorError, FileDescriptor};
use crate::privilege::EscalationConfig;
use crate::session::SessionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("File {}: {source}", .index + 1)]
    File {
        index: usize,
        #[source]
        source: DescriptorError,
    },

    #[error("Invalid prompt pattern: {0}")]
    PromptPattern(#[from] regex::Error),
}

impl RunConfig {
    /// Read, parse and validate a run file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        debug!("[config] loaded {} ({} files)", path.display(), config.files.len());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Required-field checks. Stops at the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(invalid("Please add at least one file"));
        }
        self.file_descriptors()?;

        let env = &self.environment;
        let required = [
            (env.host.as_str(), "host address"),
            (env.username.as_str(), "username"),
            (env.password.as_str(), "password"),
            (env.staging_path.as_str(), "staging path"),
            (env.restart_command.as_str(), "restart command"),
        ];
        if let Some((_, name)) = required.iter().find(|(value, _)| value.trim().is_empty()) {
            return Err(invalid(&format!("Please enter the {}", name)));
        }

        if self.test_script.script_path.as_os_str().is_empty() {
            return Err(invalid("Please select a test script"));
        }
        if self.tool.log_path.as_os_str().is_empty() {
            return Err(invalid("Please choose a log directory"));
        }

        self.escalation_config()?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        let env = &self.environment;
        SessionConfig::with_password(
            env.host.trim(),
            env.port,
            env.username.trim(),
            env.password.as_str(),
        )
        .connect_timeout(Duration::from_secs(self.tool.connect_timeout_secs))
    }

    /// `None` when no escalation command is configured.
    pub fn escalation_config(&self) -> Result<Option<EscalationConfig>, ConfigError> {
        let env = &self.environment;
        if env.root_command.trim().is_empty() {
            return Ok(None);
        }

        let settings = &self.tool.escalation;
        let mut config = EscalationConfig::new(env.root_command.trim(), env.root_password.as_str());
        config.marker = settings.marker.clone();
        config.initial_settle = Duration::from_millis(settings.initial_settle_ms);
        config.command_settle = Duration::from_millis(settings.command_settle_ms);
        config.credential_settle = Duration::from_millis(settings.credential_settle_ms);
        config.probe_settle = Duration::from_millis(settings.probe_settle_ms);

        if let Some(pattern) = settings.prompt_pattern.as_deref() {
            config = config.with_prompt_pattern(Regex::new(pattern)?);
        }
        Ok(Some(config))
    }

    pub fn file_descriptors(&self) -> Result<Vec<FileDescriptor>, ConfigError> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                FileDescriptor::new(
                    entry.local_path.clone(),
                    entry.container_path.as_str(),
                    entry.permissions.as_str(),
                )
                .map_err(|source| ConfigError::File { index, source })
            })
            .collect()
    }

    pub fn deploy_target(&self) -> DeployTarget {
        DeployTarget {
            staging_base: self.environment.staging_path.trim().to_string(),
            namespace: self.environment.namespace.trim().to_string(),
            container_selector: self.environment.container_filter.trim().to_string(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.tool.command_timeout_secs)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.tool.restart_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.tool.stop_grace_secs)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}
