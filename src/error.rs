//! Error taxonomy for the relay
//!
//! None of these ever escape the dispatch loop: channel errors degrade the
//! connection state, store and presentation errors are logged, and command
//! errors are turned into structured failure responses.

use std::path::PathBuf;
use thiserror::Error;

/// Failures on the channel to the external process
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process did not expose {0}")]
    MissingPipe(&'static str),
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed channel message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),
    #[error("channel is not connected")]
    NotConnected,
}

/// Failures of the persistent store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode record {key}: {source}")]
    Serialize {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store is not writable")]
    Unavailable,
}

/// Failures reported back to UI collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command")]
    UnknownCommand,
    #[error("Notification not found")]
    NotFound,
    #[error("Relay is not running")]
    RelayUnavailable,
}

/// Failures showing a notification to the user
#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("notification backend failed: {0}")]
    Backend(String),
}
