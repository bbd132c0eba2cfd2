pub mod app;
pub mod error;
pub mod notify;
pub mod relay;
