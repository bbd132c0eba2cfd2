//! Channel between the relay and the external notification host
//!
//! The host is a separate local process. Senders push notifications into
//! it over a Unix domain socket; the host forwards them to the relay over
//! a length-prefixed JSON channel, either its own stdio (when the relay
//! spawned it) or a second Unix socket.

pub mod channel;
pub mod client;
pub mod codec;
pub mod host;
pub mod protocol;

pub use channel::{ChannelClient, ConnectionState, Endpoint};
pub use client::send_notification;
pub use host::{run_host, HostLink};
pub use protocol::{
    ChannelMessage, Notification, NotificationId, NotificationPayload, Priority, SenderAck,
};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "claude-monitor")
}

/// Directory for sockets
pub fn runtime_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.runtime_dir().unwrap_or(d.data_dir()).to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("claude-monitor"))
}

/// Directory for the store and log files
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("claude-monitor"))
}

/// Socket senders push notifications into
pub fn sender_socket_path() -> PathBuf {
    runtime_dir().join("host.sock")
}

/// Socket the host accepts relay connections on in listen mode
pub fn channel_socket_path() -> PathBuf {
    runtime_dir().join("channel.sock")
}

/// Socket serving UI collaborators
pub fn control_socket_path() -> PathBuf {
    runtime_dir().join("control.sock")
}

/// Remove a stale socket file and bind a fresh listener
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path).context("Failed to remove existing socket")?;
    }

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    UnixListener::bind(path)
        .with_context(|| format!("Failed to bind to socket: {}", path.display()))
}
