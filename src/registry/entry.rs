//! Session entry and membership types
//!
//! This module defines the per-session state stored in the registry and the
//! receiving half handed to the session task.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::session::{CloseReason, SessionId};

/// Entry for a single session in the registry
#[derive(Debug)]
pub struct SessionEntry {
    /// Session ID
    pub id: SessionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Whether the session receives broadcasts
    pub admitted: bool,

    /// When the session was added
    pub added_at: Instant,

    /// Bounded outbound queue toward the session task
    pub(super) tx: mpsc::Sender<Bytes>,

    /// One-shot close signal; taken when fired
    close_tx: Option<oneshot::Sender<CloseReason>>,
}

impl SessionEntry {
    /// Create an entry and the matching membership handle
    pub(super) fn new(id: SessionId, peer_addr: SocketAddr, capacity: usize) -> (Self, Membership) {
        let (tx, rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = oneshot::channel();

        let entry = Self {
            id,
            peer_addr,
            admitted: false,
            added_at: Instant::now(),
            tx,
            close_tx: Some(close_tx),
        };
        let membership = Membership {
            id,
            outbound: rx,
            close: close_rx,
        };

        (entry, membership)
    }

    /// Number of chunks waiting in the outbound queue
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Tell the session task to close
    ///
    /// Dropping the entry afterwards also closes the outbound queue, so the
    /// session sees any chunks already queued and then the end of the queue.
    pub(super) fn signal(&mut self, reason: CloseReason) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(reason);
        }
    }
}

/// Receiving side of a registry membership, owned by the session task
#[derive(Debug)]
pub struct Membership {
    /// Session ID this membership belongs to
    pub id: SessionId,

    /// Broadcast chunks, in upstream order
    pub outbound: mpsc::Receiver<Bytes>,

    /// Fires when the registry closes the session
    pub close: oneshot::Receiver<CloseReason>,
}
