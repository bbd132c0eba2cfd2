//! Client side of the channel to the external notification host
//!
//! Owns the connection state and the single reconnect timer. All channel
//! faults end up as a `Disconnected` state and a scheduled retry; nothing
//! here returns an error to the dispatch loop except `send`, whose result
//! callers log.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec;
use super::protocol::ChannelMessage;
use crate::app::RelayEvent;
use crate::error::ChannelError;

type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;
type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection status of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Where the external process lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Launch the host and talk over its stdin/stdout
    Spawn {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Connect to a host already listening on a Unix socket
    Socket { path: PathBuf },
}

impl Endpoint {
    /// Human readable description shown to UI collaborators
    pub fn label(&self) -> String {
        match self {
            Endpoint::Spawn { program, args } => {
                let name = program
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| program.display().to_string());
                if args.is_empty() {
                    format!("Native host ({})", name)
                } else {
                    format!("Native host ({} {})", name, args.join(" "))
                }
            }
            Endpoint::Socket { path } => format!("Socket {}", path.display()),
        }
    }

    async fn open(&self) -> Result<Link, ChannelError> {
        match self {
            Endpoint::Socket { path } => {
                let stream = UnixStream::connect(path)
                    .await
                    .map_err(|source| ChannelError::Connect {
                        path: path.clone(),
                        source,
                    })?;
                let (reader, writer) = stream.into_split();
                Ok(Link {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    child: None,
                })
            }
            Endpoint::Spawn { program, args } => {
                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|source| ChannelError::Spawn {
                        program: program.clone(),
                        source,
                    })?;
                let stdin = child.stdin.take().ok_or(ChannelError::MissingPipe("stdin"))?;
                let stdout = child.stdout.take().ok_or(ChannelError::MissingPipe("stdout"))?;
                Ok(Link {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                    child: Some(child),
                })
            }
        }
    }
}

struct Link {
    reader: ChannelReader,
    writer: ChannelWriter,
    child: Option<Child>,
}

/// The single connection to the external process
pub struct ChannelClient {
    endpoint: Endpoint,
    state: ConnectionState,
    /// Incremented on every connection attempt
    session: u64,
    writer: Option<ChannelWriter>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    reconnect_pending: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    reconnect_delay: Duration,
    events: mpsc::Sender<RelayEvent>,
}

impl ChannelClient {
    pub fn new(
        endpoint: Endpoint,
        reconnect_delay: Duration,
        events: mpsc::Sender<RelayEvent>,
    ) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Disconnected,
            session: 0,
            writer: None,
            child: None,
            reader: None,
            reconnect_pending: false,
            reconnect_timer: None,
            reconnect_delay,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Whether an event from `session` belongs to the live connection
    pub fn is_current(&self, session: u64) -> bool {
        session == self.session
    }

    /// Open the channel, ping it, and start forwarding inbound messages
    ///
    /// On failure the state degrades to `Disconnected` and a retry is
    /// scheduled.
    pub async fn connect(&mut self) -> ConnectionState {
        self.teardown();
        self.session += 1;
        self.state = ConnectionState::Connecting;
        info!("Connecting to external process: {}", self.endpoint.label());

        match self.endpoint.open().await {
            Ok(link) => {
                self.reader = Some(spawn_reader(link.reader, self.session, self.events.clone()));
                self.writer = Some(link.writer);
                self.child = link.child;
                self.state = ConnectionState::Connected;

                if let Err(e) = self.send(&ChannelMessage::Ping).await {
                    warn!("Failed to send liveness ping: {}", e);
                }
                info!(session = self.session, "Connected to external process");
            }
            Err(e) => {
                warn!("Failed to connect to external process: {}", e);
                self.state = ConnectionState::Disconnected;
                self.schedule_reconnect();
            }
        }

        self.state
    }

    /// Best-effort send; failures are returned for logging, never retried
    pub async fn send(&mut self, message: &ChannelMessage) -> Result<(), ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::NotConnected)?;
        codec::write_message(writer, message).await
    }

    /// React to the reader of `session` going away
    ///
    /// Returns false for events from a replaced connection, which are
    /// ignored.
    pub fn handle_disconnect(&mut self, session: u64, reason: &str) -> bool {
        if !self.is_current(session) {
            debug!(session, current = self.session, "Ignoring disconnect from stale session");
            return false;
        }

        if self.state.is_connected() {
            warn!("External process disconnected: {}", reason);
        }
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.schedule_reconnect();
        true
    }

    /// Arm the reconnect timer unless one is already pending
    pub fn schedule_reconnect(&mut self) -> bool {
        if self.reconnect_pending {
            debug!("Reconnect already scheduled");
            return false;
        }

        self.reconnect_pending = true;
        let delay = self.reconnect_delay;
        let events = self.events.clone();
        info!("Reconnecting in {}s", delay.as_secs());

        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(RelayEvent::ReconnectDue).await;
        }));
        true
    }

    /// The reconnect timer fired
    pub async fn on_reconnect_due(&mut self) -> ConnectionState {
        self.reconnect_pending = false;
        self.reconnect_timer = None;

        if self.state.is_connected() {
            return self.state;
        }
        self.connect().await
    }

    /// Stop everything this client started
    pub fn shutdown(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.reconnect_pending = false;
        self.teardown();
        self.state = ConnectionState::Disconnected;
    }

    fn teardown(&mut self) {
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill external process: {}", e);
            }
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_reader(
    mut reader: ChannelReader,
    session: u64,
    events: mpsc::Sender<RelayEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = loop {
            match codec::read_message::<ChannelMessage, _>(&mut reader).await {
                Ok(Some(message)) => {
                    if events.send(RelayEvent::Inbound { session, message }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break "channel closed by peer".to_string(),
                Err(ChannelError::Protocol(e)) => {
                    warn!("Skipping malformed channel message: {}", e);
                }
                Err(e) => break e.to_string(),
            }
        };
        let _ = events.send(RelayEvent::Disconnected { session, reason }).await;
    })
}
