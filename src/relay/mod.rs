//! Relay manager and the pieces around it
//!
//! [`service::Relay`] runs the single dispatch loop; [`manager::RelayManager`]
//! owns history and unread state; [`control`] exposes the command/query
//! interface to UI collaborators.

pub mod badge;
pub mod control;
pub mod history;
pub mod manager;
pub mod service;
pub mod store;
pub mod surface;

pub use badge::Badge;
pub use control::{CommandOutcome, ControlRequest, ControlResponse, StatusSnapshot};
pub use history::History;
pub use manager::RelayManager;
pub use service::{Relay, RelayHandle};
pub use store::{MemoryStore, PersistedState, SqliteStore, Store};
pub use surface::{default_surface, NotificationSurface, SurfaceRequest};
