//! Operator-facing log sink

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

/// Severity of a [`LogRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Receiver of progress messages. All calls are fire-and-forget and must
/// not influence control flow.
pub trait LogSink: Send + Sync {
    fn info(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    fn step_start(&self, step: &str) {
        self.info(&format!("Starting step: {}", step));
    }

    fn step_complete(&self, step: &str) {
        self.info(&format!("Completed step: {}", step));
    }

    fn command_output(&self, command: &str, output: &str) {
        self.info(&format!("Command: {}\nOutput:\n{}", command, output));
    }
}

/// Forwards sink calls to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// A single message captured by [`RecordingSink`]
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

type RecordCallback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Keeps every record in memory and, optionally, hands each one to a
/// callback as it arrives. Also forwards to `tracing`.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<LogRecord>>,
    callback: Option<RecordCallback>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `callback` for every record, e.g. to feed a UI log view.
    pub fn with_callback(callback: impl Fn(&LogRecord) + Send + Sync + 'static) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Messages at `level`, in arrival order
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.message.clone())
            .collect()
    }

    /// Whether any record at `level` contains `needle`
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }

    fn push(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => TracingSink.info(message),
            LogLevel::Warning => TracingSink.warning(message),
            LogLevel::Error => TracingSink.error(message),
        }

        let record = LogRecord {
            timestamp: Local::now(),
            level,
            message: message.to_string(),
        };
        if let Some(callback) = &self.callback {
            callback(&record);
        }
        self.records.lock().push(record);
    }
}

impl LogSink for RecordingSink {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.push(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }
}
