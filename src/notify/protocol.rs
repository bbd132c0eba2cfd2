//! Protocol definitions for the relay channel and sender socket

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of a relayed notification
///
/// Hosts stamp numeric ids (milliseconds since the epoch), but any sender
/// may supply its own string id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationId {
    Number(i64),
    Text(String),
}

impl NotificationId {
    /// Id derived from an arrival time
    pub fn from_time(time: DateTime<Utc>) -> Self {
        NotificationId::Number(time.timestamp_millis())
    }

    /// Parse an id typed on the command line
    pub fn parse(s: &str) -> Self {
        s.trim()
            .parse::<i64>()
            .map(NotificationId::Number)
            .unwrap_or_else(|_| NotificationId::Text(s.to_string()))
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationId::Number(n) => write!(f, "{}", n),
            NotificationId::Text(s) => f.write_str(s),
        }
    }
}

/// Notification priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl Priority {
    /// Parse priority from string
    ///
    /// Unknown values fall back to `Info`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Priority::Success,
            "warning" => Priority::Warning,
            "error" => Priority::Error,
            _ => Priority::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Info => "info",
            Priority::Success => "success",
            Priority::Warning => "warning",
            Priority::Error => "error",
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => Priority::from_str(&s),
            _ => Priority::Info,
        })
    }
}

/// Notification payload as it arrives on the wire
///
/// Everything is optional and a field of the wrong shape counts as
/// missing; [`NotificationPayload::into_notification`] fills the gaps
/// from the arrival time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::id")]
    pub id: Option<NotificationId>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Field decoders that never reject a payload
mod lenient {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::NotificationId;

    pub fn id<'de, D>(deserializer: D) -> Result<Option<NotificationId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_i64().map(NotificationId::Number).or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| NotificationId::Number(f as i64))
            }),
            Value::String(s) if !s.is_empty() => Some(NotificationId::Text(s)),
            _ => None,
        })
    }

    pub fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// RFC 3339, a naive ISO 8601 local time, or epoch milliseconds
    pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => parse_time(&s),
            Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        })
    }

    fn parse_time(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Some(t.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl NotificationPayload {
    pub fn new(title: impl Into<String>, message: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: None,
            title: Some(title.into()),
            message: Some(message.into()),
            priority,
            timestamp: None,
        }
    }

    /// Stamp missing id and timestamp with the arrival time
    pub fn into_notification(self, arrived_at: DateTime<Utc>) -> Notification {
        Notification {
            id: self.id.unwrap_or_else(|| NotificationId::from_time(arrived_at)),
            title: self.title.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            priority: self.priority,
            timestamp: self.timestamp.unwrap_or(arrived_at),
        }
    }
}

/// A relayed notification as kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
}

/// Messages exchanged between the relay and the external host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// Liveness check
    Ping,
    /// Liveness acknowledgement
    Pong,
    /// A notification to relay
    Notification { data: NotificationPayload },
    /// Any type this build does not know about
    #[serde(other)]
    Unknown,
}

/// Reply sent by the host to a sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SenderAck {
    Ok { id: NotificationId },
    Error { message: String },
}
