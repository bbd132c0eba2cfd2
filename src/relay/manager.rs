//! Relay manager: history, unread count and the commands that change them
//!
//! State lives in memory and is the source of truth. Every mutation is
//! mirrored to the store and republished as a badge; a failed store write
//! is logged and never rolls the mutation back.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::badge::{self, Badge};
use super::control::{CommandOutcome, StatusSnapshot};
use super::history::History;
use super::store::{PersistedState, Store};
use super::surface::{NotificationSurface, SurfaceRequest};
use crate::error::CommandError;
use crate::notify::{ConnectionState, Notification, NotificationId, Priority};

pub struct RelayManager {
    history: History,
    unread_count: u32,
    store: Box<dyn Store>,
    surface: Box<dyn NotificationSurface>,
    badge_tx: watch::Sender<Badge>,
    server_label: String,
}

impl RelayManager {
    /// Restore state from the store; an unreadable store starts empty
    pub fn restore(
        store: Box<dyn Store>,
        surface: Box<dyn NotificationSurface>,
        server_label: impl Into<String>,
        history_limit: usize,
    ) -> Self {
        let persisted = match store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Failed to load stored notifications: {}", e);
                PersistedState::default()
            }
        };
        let history = History::from_records(persisted.history, history_limit);
        info!(
            "Restored {} notifications ({} unread)",
            history.len(),
            persisted.unread_count
        );

        let initial = badge::present(ConnectionState::Disconnected, persisted.unread_count);
        let (badge_tx, _) = watch::channel(initial);

        Self {
            history,
            unread_count: persisted.unread_count,
            store,
            surface,
            badge_tx,
            server_label: server_label.into(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    /// Receive every badge recomputation
    pub fn subscribe_badge(&self) -> watch::Receiver<Badge> {
        self.badge_tx.subscribe()
    }

    pub fn status(&self, connection: ConnectionState) -> StatusSnapshot {
        StatusSnapshot {
            connected: connection.is_connected(),
            server_label: self.server_label.clone(),
            history: self.history.to_vec(),
            unread_count: self.unread_count,
        }
    }

    /// Record and display an inbound notification
    ///
    /// Duplicate ids are kept; every call is a new event.
    pub fn receive_notification(
        &mut self,
        notification: Notification,
        connection: ConnectionState,
    ) {
        debug!(id = %notification.id, "Received notification");
        let request = SurfaceRequest::for_notification(&notification);

        let evicted = self.history.push_front(notification);
        if evicted > 0 {
            debug!("Evicted {} notifications past the history limit", evicted);
        }
        self.unread_count = self.unread_count.saturating_add(1);

        self.persist();
        self.refresh_badge(connection);
        self.present(&request);
    }

    /// Display a synthetic notification without touching any state
    pub fn test_notification(&self) -> CommandOutcome {
        let now = Utc::now();
        let notification = Notification {
            id: NotificationId::from_time(now),
            title: "Test Notification".to_string(),
            message: "This is a test from Claude Monitor".to_string(),
            priority: Priority::Info,
            timestamp: now,
        };
        self.present(&SurfaceRequest::for_notification(&notification));
        CommandOutcome::ok()
    }

    pub fn mark_as_read(&mut self, connection: ConnectionState) -> CommandOutcome {
        self.unread_count = 0;
        self.persist();
        self.refresh_badge(connection);
        CommandOutcome::ok()
    }

    pub fn clear_history(&mut self, connection: ConnectionState) -> CommandOutcome {
        self.history.clear();
        self.unread_count = 0;
        self.persist();
        self.refresh_badge(connection);
        CommandOutcome::ok()
    }

    /// Delete the first notification with `id`
    ///
    /// The unread count drops by one whenever something was removed, even
    /// if that entry had already been read.
    pub fn delete_notification(
        &mut self,
        id: &NotificationId,
        connection: ConnectionState,
    ) -> Result<(), CommandError> {
        if self.history.remove(id).is_none() {
            debug!(%id, "Delete requested for unknown notification");
            return Err(CommandError::NotFound);
        }

        self.unread_count = self.unread_count.saturating_sub(1);
        self.persist();
        self.refresh_badge(connection);
        Ok(())
    }

    /// Recompute and publish the badge
    pub fn refresh_badge(&self, connection: ConnectionState) -> Badge {
        let badge = badge::present(connection, self.unread_count);
        self.badge_tx.send_replace(badge.clone());
        badge
    }

    fn persist(&mut self) {
        let state = PersistedState {
            history: self.history.to_vec(),
            unread_count: self.unread_count,
        };
        if let Err(e) = self.store.save(&state) {
            warn!("Failed to persist notifications: {}", e);
        }
    }

    fn present(&self, request: &SurfaceRequest) {
        if let Err(e) = self.surface.show(request) {
            warn!(handle = %request.handle, "Failed to show notification: {}", e);
        }
    }
}
