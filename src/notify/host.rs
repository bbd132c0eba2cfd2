//! The external notification host
//!
//! Accepts notifications from senders on a Unix domain socket, stamps them
//! with an id and timestamp, and pushes them to the relay over the channel.
//! The relay side is either this process's stdio (when the relay spawned
//! it) or a listening socket.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::{bind_socket, codec};
use super::protocol::{ChannelMessage, NotificationId, NotificationPayload, SenderAck};
use crate::error::ChannelError;

const OUTBOUND_CAPACITY: usize = 100;

/// How the relay reaches this host
#[derive(Debug, Clone)]
pub enum HostLink {
    /// Framed messages on stdin/stdout; the host exits when stdin closes
    Stdio,
    /// Accept relay connections on a Unix socket, one at a time
    Listen(PathBuf),
}

#[derive(Default)]
struct HostShared {
    /// Outbound queue of the currently connected relay
    relay: RwLock<Option<mpsc::Sender<ChannelMessage>>>,
}

/// Run the host until the relay link ends
pub async fn run_host(link: HostLink, sender_socket: &Path) -> Result<()> {
    let shared = Arc::new(HostShared::default());

    let sender_listener = bind_socket(sender_socket)?;
    info!("Accepting notifications at: {}", sender_socket.display());
    let senders = tokio::spawn(accept_senders(sender_listener, shared.clone()));

    let result = match link {
        HostLink::Stdio => {
            info!("Serving relay over stdio");
            serve_relay(tokio::io::stdin(), tokio::io::stdout(), &shared).await;
            Ok(())
        }
        HostLink::Listen(path) => serve_listener(&path, &shared).await,
    };

    senders.abort();
    let _ = std::fs::remove_file(sender_socket);
    info!("Host stopped");
    result
}

async fn serve_listener(path: &Path, shared: &HostShared) -> Result<()> {
    let listener = bind_socket(path)?;
    info!("Waiting for relay at: {}", path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                info!("Relay connected");
                let (reader, writer) = stream.into_split();
                serve_relay(reader, writer, shared).await;
            }
            Err(e) => {
                warn!("Failed to accept relay connection: {}", e);
            }
        }
    }
}

/// Serve one relay connection until it closes
async fn serve_relay<R, W>(mut reader: R, mut writer: W, shared: &HostShared)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ChannelMessage>(OUTBOUND_CAPACITY);
    *shared.relay.write().await = Some(tx.clone());

    let outbound = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = codec::write_message(&mut writer, &message).await {
                warn!("Failed to write to relay: {}", e);
                break;
            }
        }
    });

    loop {
        match codec::read_message::<ChannelMessage, _>(&mut reader).await {
            Ok(Some(ChannelMessage::Ping)) => {
                if tx.send(ChannelMessage::Pong).await.is_err() {
                    break;
                }
            }
            Ok(Some(other)) => debug!("Ignoring message from relay: {:?}", other),
            Ok(None) => {
                info!("Relay disconnected");
                break;
            }
            Err(ChannelError::Protocol(e)) => warn!("Skipping malformed relay message: {}", e),
            Err(e) => {
                warn!("Relay channel failed: {}", e);
                break;
            }
        }
    }

    *shared.relay.write().await = None;
    outbound.abort();
}

async fn accept_senders(listener: UnixListener, shared: Arc<HostShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_sender(stream, &shared).await {
                        warn!("Error handling sender: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!("Failed to accept sender: {}", e);
            }
        }
    }
}

async fn handle_sender(mut stream: UnixStream, shared: &HostShared) -> Result<()> {
    let ack = match codec::read_message::<NotificationPayload, _>(&mut stream).await {
        Ok(Some(payload)) => forward(payload, shared).await,
        Ok(None) => return Ok(()),
        Err(e) => SenderAck::Error { message: e.to_string() },
    };

    codec::write_message(&mut stream, &ack)
        .await
        .context("Failed to reply to sender")?;
    Ok(())
}

async fn forward(payload: NotificationPayload, shared: &HostShared) -> SenderAck {
    let now = Utc::now();
    let id = NotificationId::from_time(now);
    let title = payload.title.clone().unwrap_or_else(|| "Notification".to_string());
    let data = NotificationPayload {
        id: Some(id.clone()),
        timestamp: Some(now),
        ..payload
    };

    let relay = shared.relay.read().await.clone();
    let Some(tx) = relay else {
        return SenderAck::Error {
            message: "Relay not connected".to_string(),
        };
    };

    match tx.send(ChannelMessage::Notification { data }).await {
        Ok(()) => {
            info!("Pushed: {}", title);
            SenderAck::Ok { id }
        }
        Err(_) => SenderAck::Error {
            message: "Relay not connected".to_string(),
        },
    }
}
