//! Badge presenter
//!
//! Pure mapping from connection state and unread count to the compact
//! indicator shown by UI collaborators.

use serde::{Deserialize, Serialize};

use crate::notify::ConnectionState;

/// Accent colour behind an unread count
pub const UNREAD_COLOR: &str = "#D97706";
/// Colour when connected with nothing unread (text is empty)
pub const ONLINE_COLOR: &str = "#4CAF50";
/// Colour of the offline glyph
pub const OFFLINE_COLOR: &str = "#F44336";
pub const OFFLINE_GLYPH: &str = "○";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    pub color: String,
}

impl Default for Badge {
    fn default() -> Self {
        present(ConnectionState::Disconnected, 0)
    }
}

/// Compute the badge; unread takes precedence over connection state
pub fn present(connection: ConnectionState, unread_count: u32) -> Badge {
    if unread_count > 0 {
        let text = if unread_count > 99 {
            "99+".to_string()
        } else {
            unread_count.to_string()
        };
        Badge {
            text,
            color: UNREAD_COLOR.to_string(),
        }
    } else if connection.is_connected() {
        Badge {
            text: String::new(),
            color: ONLINE_COLOR.to_string(),
        }
    } else {
        Badge {
            text: OFFLINE_GLYPH.to_string(),
            color: OFFLINE_COLOR.to_string(),
        }
    }
}
