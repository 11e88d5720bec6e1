//! Session state machine
//!
//! Tracks a downstream session from accept to close.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::RequestHead;

/// Unique session identifier, assigned by the listener
pub type SessionId = u64;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepted, waiting for a complete request head
    AwaitingHeader,
    /// Admitted; receiving broadcast bytes
    Streaming,
    /// Session closed
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client closed its end of the connection
    RemoteClosed,
    /// Upstream feed ended; the registry closed every member
    UpstreamClosed,
    /// Outbound queue overflowed and the registry evicted the session
    SlowConsumer,
    /// Relay is shutting down
    Shutdown,
    /// Session was removed from the registry without a signal
    Detached,
}

impl CloseReason {
    /// Whether bytes already queued should be written out before closing
    pub fn flushes_pending(self) -> bool {
        self == CloseReason::UpstreamClosed
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::RemoteClosed => "remote closed",
            CloseReason::UpstreamClosed => "upstream closed",
            CloseReason::SlowConsumer => "slow consumer",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Detached => "detached",
        };
        f.write_str(reason)
    }
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: SessionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Accept time
    pub connected_at: Instant,

    /// Time the session was admitted to the broadcast
    pub admitted_at: Option<Instant>,

    /// Parsed request head (after admission)
    pub request: Option<RequestHead>,

    /// Bytes read from the client, head included
    pub bytes_received: u64,

    /// Broadcast bytes written to the client, preamble excluded
    pub bytes_sent: u64,

    /// Broadcast chunks written to the client
    pub chunks_sent: u64,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: SessionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::AwaitingHeader,
            connected_at: Instant::now(),
            admitted_at: None,
            request: None,
            bytes_received: 0,
            bytes_sent: 0,
            chunks_sent: 0,
        }
    }

    /// Transition to streaming after the request head was accepted
    pub fn admit(&mut self, request: RequestHead) {
        if self.phase == SessionPhase::AwaitingHeader {
            self.phase = SessionPhase::Streaming;
            self.admitted_at = Some(Instant::now());
            self.request = Some(request);
        }
    }

    /// Record a chunk written to the client
    pub fn on_sent(&mut self, len: usize) {
        self.bytes_sent += len as u64;
        self.chunks_sent += 1;
    }

    /// Mark the session closed
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
