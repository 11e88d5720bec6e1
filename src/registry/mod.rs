//! Session registry for broadcast fan-out
//!
//! The registry holds every downstream session and routes upstream chunks to
//! the admitted ones. Each session owns a bounded `tokio::sync::mpsc` queue;
//! the registry holds the sending half.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<SessionRegistry>
//!                     ┌─────────────────────────┐
//!                     │ entries: Vec<           │
//!                     │   SessionEntry {        │
//!                     │     admitted,           │
//!                     │     tx: mpsc::Sender,   │
//!                     │     close_tx,           │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!   [UpstreamFeed]        [DownstreamSession]     [DownstreamSession]
//!    read chunk           outbound.recv()         outbound.recv()
//!         │                       │                       │
//!         └──► registry.broadcast()──► write_all() ──► TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so every session shares the same
//! allocation for a chunk. Only the handle is cloned per session.
//!
//! # Backpressure
//!
//! Each queue holds at most `outbound_capacity` chunks. A session that falls
//! that far behind is evicted rather than letting its backlog grow.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{Membership, SessionEntry};
pub use error::RegistryError;
pub use store::SessionRegistry;
