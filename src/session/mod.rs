//! Downstream session management
//!
//! Each accepted client runs as a [`DownstreamSession`] task:
//!
//! ```text
//! AwaitingHeader ──(request head ok)──► Streaming ──► Closed
//!       │                                                ▲
//!       └──(too large / malformed / close signal)────────┘
//! ```

pub mod downstream;
pub mod state;

pub use downstream::DownstreamSession;
pub use state::{CloseReason, SessionId, SessionPhase, SessionState};
