//! The relay dispatch loop
//!
//! One task owns the channel client and the relay manager and handles
//! events strictly in arrival order. Everything else talks to it through
//! the event queue, so the shared state needs no locking.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::badge::Badge;
use super::control::{CommandOutcome, ControlRequest, ControlResponse, StatusSnapshot};
use super::manager::RelayManager;
use crate::app::RelayEvent;
use crate::error::CommandError;
use crate::notify::{ChannelClient, ChannelMessage, ConnectionState, Endpoint, NotificationId};

const EVENT_QUEUE_CAPACITY: usize = 100;

pub struct Relay {
    channel: ChannelClient,
    manager: RelayManager,
    events: mpsc::Receiver<RelayEvent>,
}

/// Cheap, cloneable way in for UI collaborators
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayEvent>,
    badge: watch::Receiver<Badge>,
}

impl Relay {
    pub fn new(
        endpoint: Endpoint,
        reconnect_delay: Duration,
        manager: RelayManager,
    ) -> (Self, RelayHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handle = RelayHandle {
            tx: tx.clone(),
            badge: manager.subscribe_badge(),
        };
        let relay = Self {
            channel: ChannelClient::new(endpoint, reconnect_delay, tx),
            manager,
            events: rx,
        };
        (relay, handle)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Connect and process events until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.channel.connect().await;
        self.manager.refresh_badge(self.channel.state());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.dispatch(event).await,
                        None => break,
                    }
                }
            }
        }

        self.channel.shutdown();
        info!("Relay stopped");
    }

    pub async fn dispatch(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Inbound { session, message } => {
                if !self.channel.is_current(session) {
                    debug!(session, "Dropping message from stale session");
                    return;
                }
                self.handle_inbound(message);
            }
            RelayEvent::Disconnected { session, reason } => {
                if self.channel.handle_disconnect(session, &reason) {
                    self.manager.refresh_badge(self.channel.state());
                }
            }
            RelayEvent::ReconnectDue => {
                self.channel.on_reconnect_due().await;
                self.manager.refresh_badge(self.channel.state());
            }
            RelayEvent::Command { request, reply } => {
                let response = self.handle_command(request);
                if reply.send(response).is_err() {
                    debug!("Command caller went away before the reply");
                }
            }
        }
    }

    fn handle_inbound(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::Notification { data } => {
                let notification = data.into_notification(Utc::now());
                self.manager.receive_notification(notification, self.channel.state());
            }
            ChannelMessage::Pong => debug!("External process is alive"),
            ChannelMessage::Ping => debug!("Ignoring ping from external process"),
            ChannelMessage::Unknown => debug!("Ignoring unknown message type"),
        }
    }

    fn handle_command(
        &mut self,
        request: ControlRequest,
    ) -> Result<ControlResponse, CommandError> {
        let connection = self.channel.state();
        let outcome = match request {
            ControlRequest::GetStatus => {
                return Ok(ControlResponse::Status(self.manager.status(connection)));
            }
            ControlRequest::TestNotification => self.manager.test_notification(),
            ControlRequest::ClearHistory => self.manager.clear_history(connection),
            ControlRequest::MarkAsRead => self.manager.mark_as_read(connection),
            ControlRequest::DeleteNotification { id } => {
                self.manager.delete_notification(&id, connection)?;
                CommandOutcome::ok()
            }
        };
        Ok(ControlResponse::Outcome(outcome))
    }
}

impl RelayHandle {
    /// Queue a request behind any pending events and wait for the answer
    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse, CommandError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(RelayEvent::Command { request, reply })
            .await
            .map_err(|_| CommandError::RelayUnavailable)?;
        response.await.map_err(|_| CommandError::RelayUnavailable)?
    }

    pub async fn get_status(&self) -> Result<StatusSnapshot, CommandError> {
        match self.request(ControlRequest::GetStatus).await? {
            ControlResponse::Status(status) => Ok(status),
            ControlResponse::Outcome(_) => Err(CommandError::UnknownCommand),
        }
    }

    pub async fn test_notification(&self) -> Result<(), CommandError> {
        self.command(ControlRequest::TestNotification).await
    }

    pub async fn clear_history(&self) -> Result<(), CommandError> {
        self.command(ControlRequest::ClearHistory).await
    }

    pub async fn mark_as_read(&self) -> Result<(), CommandError> {
        self.command(ControlRequest::MarkAsRead).await
    }

    pub async fn delete_notification(&self, id: NotificationId) -> Result<(), CommandError> {
        self.command(ControlRequest::DeleteNotification { id }).await
    }

    /// Latest badge, updated after every relevant state change
    pub fn badge(&self) -> watch::Receiver<Badge> {
        self.badge.clone()
    }

    async fn command(&self, request: ControlRequest) -> Result<(), CommandError> {
        match self.request(request).await? {
            ControlResponse::Outcome(_) => Ok(()),
            ControlResponse::Status(_) => Err(CommandError::UnknownCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{codec, NotificationPayload, Priority};
    use crate::relay::store::MemoryStore;
    use crate::relay::surface::LogSurface;
    use crate::relay::control;
    use tempfile::tempdir;
    use tokio::net::{UnixListener, UnixStream};

    fn relay_for(endpoint: Endpoint) -> (Relay, RelayHandle) {
        let manager = RelayManager::restore(
            Box::new(MemoryStore::default()),
            Box::new(LogSurface),
            endpoint.label(),
            100,
        );
        Relay::new(endpoint, Duration::from_secs(5), manager)
    }

    async fn wait_for_unread(handle: &RelayHandle, expected: u32) -> StatusSnapshot {
        for _ in 0..100 {
            let status = handle.get_status().await.unwrap();
            if status.unread_count == expected {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("unread count never reached {}", expected);
    }

    async fn push(host: &mut UnixStream, id: i64) {
        let mut payload =
            NotificationPayload::new(format!("Task {}", id), "done", Priority::Success);
        payload.id = Some(NotificationId::Number(id));
        codec::write_message(host, &ChannelMessage::Notification { data: payload })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_end_to_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channel.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let (relay, handle) = relay_for(Endpoint::Socket { path });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(relay.run(shutdown_rx));

        let (mut host, _) = listener.accept().await.unwrap();
        let ping: Option<ChannelMessage> = codec::read_message(&mut host).await.unwrap();
        assert_eq!(ping, Some(ChannelMessage::Ping));

        for id in 1..=3 {
            push(&mut host, id).await;
        }
        let status = wait_for_unread(&handle, 3).await;
        assert!(status.connected);
        let ids: Vec<_> = status.history.iter().map(|n| n.id.clone()).collect();
        assert_eq!(
            ids,
            vec![NotificationId::Number(3), NotificationId::Number(2), NotificationId::Number(1)]
        );
        assert_eq!(handle.badge().borrow().text, "3");

        handle.delete_notification(NotificationId::Number(2)).await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.history.len(), 2);
        assert_eq!(status.unread_count, 2);

        assert_eq!(
            handle.delete_notification(NotificationId::Number(999)).await,
            Err(CommandError::NotFound)
        );

        handle.mark_as_read().await.unwrap();
        handle.test_notification().await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.unread_count, 0);
        assert_eq!(status.history.len(), 2);

        handle.clear_history().await.unwrap();
        let status = handle.get_status().await.unwrap();
        assert!(status.history.is_empty());

        // host goes away: relay degrades to offline
        drop(host);
        for _ in 0..100 {
            if !handle.get_status().await.unwrap().connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.get_status().await.unwrap().connected);
        assert_eq!(handle.badge().borrow().text, "○");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(handle.get_status().await, Err(CommandError::RelayUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_to_restarted_host() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channel.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let (relay, handle) = relay_for(Endpoint::Socket { path: path.clone() });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(relay.run(shutdown_rx));

        let (mut host, _) = listener.accept().await.unwrap();
        let ping: Option<ChannelMessage> = codec::read_message(&mut host).await.unwrap();
        assert_eq!(ping, Some(ChannelMessage::Ping));
        push(&mut host, 1).await;
        wait_for_unread(&handle, 1).await;
        handle.mark_as_read().await.unwrap();

        // host restarts: old socket gone until it binds again
        drop(host);
        drop(listener);
        std::fs::remove_file(&path).unwrap();
        let dropped_at = tokio::time::Instant::now();
        for _ in 0..100 {
            if !handle.get_status().await.unwrap().connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.get_status().await.unwrap().connected);
        assert_eq!(handle.badge().borrow().text, "○");

        let listener = UnixListener::bind(&path).unwrap();
        let (mut host, _) = listener.accept().await.unwrap();
        assert!(dropped_at.elapsed() >= Duration::from_secs(5));
        let ping: Option<ChannelMessage> = codec::read_message(&mut host).await.unwrap();
        assert_eq!(ping, Some(ChannelMessage::Ping));

        let status = handle.get_status().await.unwrap();
        assert!(status.connected);
        assert_eq!(handle.badge().borrow().text, "");

        push(&mut host, 2).await;
        let status = wait_for_unread(&handle, 1).await;
        let ids: Vec<_> = status.history.iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec![NotificationId::Number(2), NotificationId::Number(1)]);
        assert_eq!(handle.badge().borrow().text, "1");
    }

    #[tokio::test]
    async fn test_command_errors_stay_typed() {
        let dir = tempdir().unwrap();
        let (mut relay, _handle) = relay_for(Endpoint::Socket {
            path: dir.path().join("missing.sock"),
        });

        let (reply, response) = oneshot::channel();
        let request = ControlRequest::DeleteNotification {
            id: NotificationId::Text("job-7".to_string()),
        };
        relay.dispatch(RelayEvent::Command { request, reply }).await;
        assert_eq!(response.await.unwrap(), Err(CommandError::NotFound));
    }

    #[tokio::test]
    async fn test_commands_work_while_offline() {
        let dir = tempdir().unwrap();
        let (relay, handle) = relay_for(Endpoint::Socket {
            path: dir.path().join("missing.sock"),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(relay.run(shutdown_rx));

        let status = handle.get_status().await.unwrap();
        assert!(!status.connected);
        assert_eq!(handle.badge().borrow().text, "○");
        assert!(handle.clear_history().await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_session_messages_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("channel.sock");
        let _listener = UnixListener::bind(&path).unwrap();
        let (mut relay, _handle) = relay_for(Endpoint::Socket { path });

        relay.channel.connect().await;
        let stale = relay.channel.session() - 1;
        let mut payload = NotificationPayload::new("late", "from old link", Priority::Info);
        payload.id = Some(NotificationId::Number(1));
        relay
            .dispatch(RelayEvent::Inbound {
                session: stale,
                message: ChannelMessage::Notification { data: payload },
            })
            .await;
        assert!(relay.manager.history().is_empty());
        assert_eq!(relay.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_control_socket_round_trip() {
        let dir = tempdir().unwrap();
        let control_path = dir.path().join("control.sock");
        let (relay, handle) = relay_for(Endpoint::Socket {
            path: dir.path().join("missing.sock"),
        });
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(relay.run(shutdown_rx));

        let server = {
            let path = control_path.clone();
            tokio::spawn(async move { control::run_control_server(&path, handle).await })
        };
        for _ in 0..100 {
            if control_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let responses = tokio::task::spawn_blocking(move || {
            let status = control::request(&control_path, &ControlRequest::GetStatus).unwrap();
            let missing = control::request(
                &control_path,
                &ControlRequest::DeleteNotification {
                    id: NotificationId::Number(999),
                },
            )
            .unwrap();

            // hand-written garbage is answered, not dropped
            let mut stream = std::os::unix::net::UnixStream::connect(&control_path).unwrap();
            let garbage = serde_json::json!({"type": "reboot"});
            codec::write_message_blocking(&mut stream, &garbage).unwrap();
            let unknown: ControlResponse = codec::read_message_blocking(&mut stream).unwrap();
            (status, missing, unknown)
        })
        .await
        .unwrap();

        match responses.0 {
            ControlResponse::Status(status) => assert_eq!(status.unread_count, 0),
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(responses.1, ControlResponse::from(CommandError::NotFound));
        assert_eq!(responses.2, ControlResponse::from(CommandError::UnknownCommand));

        server.abort();
    }
}
