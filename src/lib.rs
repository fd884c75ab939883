//! podstage
//!
//! Pushes build artifacts into a Kubernetes pod through an SSH jump host,
//! restarts the service and runs a local test script against it.
//!
//! Layers, bottom-up:
//!
//! - [`session`]: connection parameters, command results, connection state
//! - [`ssh`]: russh client session, SFTP, interactive shells
//! - [`privilege`]: `su`-style escalation producing an [`privilege::ElevatedSession`]
//! - [`transfer`]: chunked upload to a staging directory, `kubectl cp`/`chmod`
//! - [`deploy`]: ordered, fail-fast pipeline over file descriptors
//! - [`runner`]: local test script supervision
//! - [`workflow`]: the end-to-end run
//!
//! [`config`] loads the JSON run file and [`logging`] sets up `tracing` and
//! the progress sink.

pub mod config;
pub mod deploy;
pub mod logging;
pub mod privilege;
pub mod runner;
pub mod session;
pub mod ssh;
pub mod transfer;
pub mod workflow;

#[cfg(test)]
mod test_support;
