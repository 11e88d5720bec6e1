//! Statistics and metrics for relay sessions and the upstream feed

use std::time::{Duration, Instant};

/// Session-level statistics, reported when a session closes
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Bytes read from the client
    pub bytes_received: u64,
    /// Broadcast bytes written to the client
    pub bytes_sent: u64,
    /// Broadcast chunks written to the client
    pub chunks_sent: u64,
    /// Inbound bytes ignored after admission
    pub bytes_discarded: u64,
    /// Time from accept to close
    pub duration: Duration,
    /// Average outbound bitrate (bits/sec)
    pub bitrate: u64,
}

impl SessionStats {
    /// Calculate bitrate from bytes sent and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bitrate = (self.bytes_sent * 8) / secs;
        }
    }
}

/// Upstream feed statistics
#[derive(Debug, Clone)]
pub struct FeedStats {
    /// Upstream address
    pub upstream: String,
    /// When the feed connected
    pub connected_at: Instant,
    /// Bytes read from the origin
    pub bytes_received: u64,
    /// Chunks read from the origin
    pub chunks: u64,
    /// Per-session deliveries across all chunks
    pub deliveries: u64,
}

impl FeedStats {
    pub fn new(upstream: String) -> Self {
        Self {
            upstream,
            connected_at: Instant::now(),
            bytes_received: 0,
            chunks: 0,
            deliveries: 0,
        }
    }

    /// Record one chunk and the number of sessions it reached
    pub fn on_chunk(&mut self, len: usize, delivered: usize) {
        self.bytes_received += len as u64;
        self.chunks += 1;
        self.deliveries += delivered as u64;
    }

    /// Get duration since the feed connected
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Calculate inbound bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }

    /// Average number of sessions reached per chunk
    pub fn average_fanout(&self) -> f64 {
        if self.chunks > 0 {
            self.deliveries as f64 / self.chunks as f64
        } else {
            0.0
        }
    }
}

/// Registry snapshot
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Current sessions, admitted or not
    pub sessions: usize,
    /// Sessions receiving broadcasts
    pub admitted: usize,
    /// Chunks waiting across all outbound queues
    pub queued_chunks: usize,
    /// Chunks broadcast since start
    pub chunks_broadcast: u64,
    /// Sessions evicted as slow consumers
    pub evicted: u64,
    /// Whether the registry was cascade-closed
    pub closed: bool,
}
