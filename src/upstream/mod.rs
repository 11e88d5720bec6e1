//! Upstream feed
//!
//! The relay's single client-side connection. It sends one fixed request to
//! the origin and forwards everything that comes back, response header
//! included, to the session registry.

pub mod config;
pub mod feed;

pub use config::UpstreamConfig;
pub use feed::UpstreamFeed;
