//! Session model
//!
//! Value types (connection parameters, command results) and the connection
//! status tracked by [`crate::ssh::RemoteSession`].

pub mod state;
pub mod types;

pub use state::{ConnectionState, ConnectionStatus};
pub use types::{
    CommandResult, SessionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, MISSING_EXIT_STATUS,
};
