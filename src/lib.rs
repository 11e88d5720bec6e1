//! stream-splitter: one HTTP fetch, many listeners
//!
//! The relay opens a single `GET` to an origin and copies every byte it reads
//! to each connected client. Clients speak just enough HTTP/1.0 to be
//! admitted: one request head, answered with a fixed `200 OK` preamble,
//! followed by the origin's bytes verbatim.
//!
//! # Example
//!
//! ```no_run
//! use stream_splitter::{Relay, ServerConfig, UpstreamConfig};
//!
//! # async fn run() -> stream_splitter::Result<()> {
//! let relay = Relay::new(
//!     ServerConfig::with_port(8080),
//!     UpstreamConfig::new("origin.example", 80, "/live"),
//! );
//! relay.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```
//!
//! When the origin closes, every client is closed after its queued bytes are
//! flushed and [`Relay::run`] returns [`Error::UpstreamClosed`]. There is no
//! reconnect.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod upstream;

pub use error::{Error, FramingError, Result};
pub use registry::{RegistryConfig, SessionRegistry};
pub use server::{Listener, Relay, ServerConfig};
pub use session::{CloseReason, DownstreamSession};
pub use upstream::{UpstreamConfig, UpstreamFeed};
