//! Logging
//!
//! Two layers:
//!
//! - `tracing` diagnostics, installed by [`init_tracing`] (console + optional
//!   per-run log file)
//! - the operator-facing [`LogSink`], which the engine calls at each step so
//!   a front end can show progress. [`TracingSink`] forwards to `tracing`;
//!   [`RecordingSink`] keeps records in memory and can hand each one to a
//!   callback.

mod sink;

pub use sink::{LogLevel, LogRecord, LogSink, RecordingSink, TracingSink};

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Directory name used under the platform cache dir for run logs.
const LOG_DIR_NAME: &str = "podstage";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. When `log_file` is given,
/// every event is also appended to it without ANSI colouring.
pub fn init_tracing(log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::options().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))
}

/// Default location of the per-run log file.
pub fn temp_log_path() -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    base.join(LOG_DIR_NAME)
        .join(format!("auto_test_temp_{}.log", stamp))
}

/// Copy the run log into `save_dir` as `auto_test_<timestamp>.log`.
///
/// Returns the path of the saved copy. A missing source log produces an
/// empty file so the operator still gets a marker for the run.
pub fn save_session_log(log_file: Option<&Path>, save_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(save_dir)?;

    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let target = save_dir.join(format!("auto_test_{}.log", stamp));

    match log_file {
        Some(source) if source.exists() => {
            fs::copy(source, &target)?;
        }
        _ => {
            File::create(&target)?;
        }
    }

    Ok(target)
}
