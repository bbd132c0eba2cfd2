//! Command/query interface for UI collaborators
//!
//! Requests and responses are framed JSON on a Unix domain socket. Every
//! request gets either a payload or a structured failure back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use super::service::RelayHandle;
use crate::error::CommandError;
use crate::notify::{self, codec, Notification, NotificationId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlRequest {
    GetStatus,
    TestNotification,
    ClearHistory,
    DeleteNotification {
        #[serde(alias = "notificationId")]
        id: NotificationId,
    },
    MarkAsRead,
}

/// Answer to `getStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub connected: bool,
    pub server_label: String,
    pub history: Vec<Notification>,
    pub unread_count: u32,
}

/// Answer to every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: &CommandError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlResponse {
    Status(StatusSnapshot),
    Outcome(CommandOutcome),
}

impl From<CommandError> for ControlResponse {
    fn from(error: CommandError) -> Self {
        ControlResponse::Outcome(CommandOutcome::failed(&error))
    }
}

/// Serve UI collaborators until the listener fails to bind
pub async fn run_control_server(socket_path: &Path, handle: RelayHandle) -> Result<()> {
    let listener = notify::bind_socket(socket_path)?;
    info!("Control socket listening at: {}", socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handle).await {
                        warn!("Error handling control connection: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!("Failed to accept control connection: {}", e);
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, handle: RelayHandle) -> Result<()> {
    while let Some(frame) = codec::read_frame(&mut stream)
        .await
        .context("Failed to read control request")?
    {
        let response = match serde_json::from_slice::<ControlRequest>(&frame) {
            Ok(request) => {
                debug!("Control request: {:?}", request);
                handle.request(request).await.unwrap_or_else(ControlResponse::from)
            }
            Err(e) => {
                debug!("Rejecting control request: {}", e);
                ControlResponse::from(CommandError::UnknownCommand)
            }
        };

        codec::write_message(&mut stream, &response)
            .await
            .context("Failed to write control response")?;
    }
    Ok(())
}

/// Send one request to a running relay
pub fn request(socket_path: &Path, request: &ControlRequest) -> Result<ControlResponse> {
    let mut stream = StdUnixStream::connect(socket_path)
        .with_context(|| format!("Failed to connect to socket: {}", socket_path.display()))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("Failed to set read timeout")?;
    stream
        .set_write_timeout(Some(Duration::from_secs(5)))
        .context("Failed to set write timeout")?;

    codec::write_message_blocking(&mut stream, request).context("Failed to send request")?;
    let response = codec::read_message_blocking(&mut stream).context("Failed to read response")?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_names() {
        let json = serde_json::to_string(&ControlRequest::GetStatus).unwrap();
        assert_eq!(json, r#"{"type":"getStatus"}"#);

        let json = r#"{"type":"deleteNotification","notificationId":1700000000000}"#;
        let req: ControlRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req,
            ControlRequest::DeleteNotification {
                id: NotificationId::Number(1_700_000_000_000)
            }
        );
    }

    #[test]
    fn test_failure_shape() {
        let response = ControlResponse::from(CommandError::NotFound);
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"Notification not found"}"#);
        assert_eq!(
            serde_json::to_string(&CommandOutcome::ok()).unwrap(),
            r#"{"success":true}"#
        );
    }

    #[test]
    fn test_status_shape() {
        let snapshot = StatusSnapshot {
            connected: true,
            server_label: "Native host (claude-monitor host)".to_string(),
            history: Vec::new(),
            unread_count: 0,
        };
        let json = serde_json::to_value(ControlResponse::Status(snapshot.clone())).unwrap();
        assert_eq!(json["serverLabel"], "Native host (claude-monitor host)");
        assert_eq!(json["unreadCount"], 0);

        let parsed: ControlResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ControlResponse::Status(snapshot));
    }
}
