pub mod config;
pub mod events;

pub use config::{ChannelConfig, Config};
pub use events::RelayEvent;
