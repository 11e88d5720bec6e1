//! Relay server
//!
//! The [`Relay`] connects the upstream feed, binds the [`Listener`] and runs
//! both until the origin ends or shutdown is requested.

pub mod config;
pub mod listener;
pub mod relay;

pub use config::ServerConfig;
pub use listener::Listener;
pub use relay::Relay;
