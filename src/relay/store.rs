//! Persistent store for history and unread count
//!
//! Two named records in a SQLite key/value table, always written together
//! in one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::error::StoreError;
use crate::notify::Notification;

const HISTORY_KEY: &str = "notification_history";
const UNREAD_KEY: &str = "unread_count";

/// Everything the relay persists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub history: Vec<Notification>,
    pub unread_count: u32,
}

/// Durable mirror of the relay state
pub trait Store: Send {
    fn load(&self) -> Result<PersistedState, StoreError>;
    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!("Store opened at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM records WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;

        // corrupt records read as absent
        Ok(raw.and_then(|value| match serde_json::from_str(&value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Discarding unreadable record {}: {}", key, e);
                None
            }
        }))
    }
}

fn encode<T: Serialize>(key: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Serialize { key, source })
}

impl Store for SqliteStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(PersistedState {
            history: self.read_record(HISTORY_KEY)?.unwrap_or_default(),
            unread_count: self.read_record(UNREAD_KEY)?.unwrap_or(0),
        })
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let history = encode(HISTORY_KEY, &state.history)?;
        let unread = encode(UNREAD_KEY, &state.unread_count)?;

        let tx = self.conn.transaction()?;
        for (key, value) in [(HISTORY_KEY, history), (UNREAD_KEY, unread)] {
            tx.execute(
                "INSERT INTO records (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Non-durable store, used when the database cannot be opened and in tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: PersistedState,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// A store whose every write fails
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable);
        }
        self.state = state.clone();
        Ok(())
    }
}
