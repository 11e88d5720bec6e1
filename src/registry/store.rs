//! Session registry implementation
//!
//! The central set of downstream sessions. The upstream feed pushes every
//! chunk through [`SessionRegistry::broadcast`]; sessions join on accept and
//! start receiving once admitted.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;

use super::config::RegistryConfig;
use super::entry::{Membership, SessionEntry};
use super::error::RegistryError;
use crate::session::{CloseReason, SessionId};
use crate::stats::RegistryStats;

#[derive(Debug, Default)]
struct Members {
    /// Sessions in insertion order
    entries: Vec<SessionEntry>,
    /// Set once by `cascade_close`; no further sessions are added
    sealed: bool,
    /// Chunks broadcast so far
    chunks: u64,
    /// Sessions evicted as slow consumers
    evicted: u64,
}

impl Members {
    fn position(&self, id: SessionId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }
}

/// Registry of downstream sessions
///
/// Every operation runs under a single lock, so a broadcast is one consistent
/// pass: sessions added or admitted concurrently only see later chunks.
pub struct SessionRegistry {
    members: Mutex<Members>,

    /// Configuration
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a new session registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new session registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            members: Mutex::new(Members::default()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add a new, not yet admitted session
    ///
    /// Returns the receiving half the session task reads broadcasts and close
    /// signals from.
    pub async fn add(
        &self,
        id: SessionId,
        peer_addr: SocketAddr,
    ) -> Result<Membership, RegistryError> {
        let mut members = self.members.lock().await;

        if members.sealed {
            return Err(RegistryError::Closed);
        }
        if members.position(id).is_some() {
            return Err(RegistryError::DuplicateSession(id));
        }

        let (entry, membership) =
            SessionEntry::new(id, peer_addr, self.config.outbound_capacity);
        members.entries.push(entry);

        tracing::debug!(
            session_id = id,
            peer = %peer_addr,
            sessions = members.entries.len(),
            "Session added"
        );

        Ok(membership)
    }

    /// Admit a session to the broadcast
    ///
    /// Returns false if the session is no longer a member.
    pub async fn admit(&self, id: SessionId) -> bool {
        let mut members = self.members.lock().await;

        let Some(idx) = members.position(id) else {
            return false;
        };
        members.entries[idx].admitted = true;

        let admitted = members.entries.iter().filter(|e| e.admitted).count();
        tracing::info!(session_id = id, admitted = admitted, "Session admitted");

        true
    }

    /// Remove a session
    ///
    /// Removing a session that is not present is a no-op. Returns whether a
    /// member was removed.
    pub async fn remove(&self, id: SessionId) -> bool {
        let mut members = self.members.lock().await;

        match members.position(id) {
            Some(idx) => {
                members.entries.remove(idx);
                tracing::debug!(
                    session_id = id,
                    sessions = members.entries.len(),
                    "Session removed"
                );
                true
            }
            None => false,
        }
    }

    /// Broadcast a chunk to every admitted session, in registry order
    ///
    /// A session whose queue is full is evicted as a slow consumer once the
    /// pass is complete. Returns the number of sessions the chunk was queued
    /// for.
    pub async fn broadcast(&self, chunk: Bytes) -> usize {
        let mut members = self.members.lock().await;
        members.chunks += 1;

        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (idx, entry) in members.entries.iter().enumerate() {
            if !entry.admitted {
                continue;
            }
            match entry.tx.try_send(chunk.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => evicted.push((idx, CloseReason::SlowConsumer)),
                Err(TrySendError::Closed(_)) => evicted.push((idx, CloseReason::Detached)),
            }
        }

        // Highest index first so earlier indices stay valid
        for (idx, reason) in evicted.into_iter().rev() {
            let mut entry = members.entries.remove(idx);
            if reason == CloseReason::SlowConsumer {
                members.evicted += 1;
                tracing::warn!(
                    session_id = entry.id,
                    peer = %entry.peer_addr,
                    capacity = self.config.outbound_capacity,
                    member_for_ms = entry.added_at.elapsed().as_millis() as u64,
                    "Evicting slow consumer"
                );
            }
            entry.signal(reason);
        }

        tracing::trace!(len = chunk.len(), delivered = delivered, "Chunk broadcast");

        delivered
    }

    /// Close every session and seal the registry
    ///
    /// Used when the upstream feed ends or the relay shuts down. Returns the
    /// number of sessions closed.
    pub async fn cascade_close(&self, reason: CloseReason) -> usize {
        let mut members = self.members.lock().await;
        members.sealed = true;

        let closed = members.entries.len();
        for mut entry in members.entries.drain(..) {
            entry.signal(reason);
        }

        tracing::info!(sessions = closed, reason = %reason, "Cascade close");

        closed
    }

    /// Number of sessions, admitted or not
    pub async fn len(&self) -> usize {
        self.members.lock().await.entries.len()
    }

    /// Check if there are no sessions
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.entries.is_empty()
    }

    /// Number of sessions receiving broadcasts
    pub async fn admitted_count(&self) -> usize {
        self.members
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.admitted)
            .count()
    }

    /// Check if a session is a member
    pub async fn contains(&self, id: SessionId) -> bool {
        self.members.lock().await.position(id).is_some()
    }

    /// Check if the registry has been cascade-closed
    pub async fn is_closed(&self) -> bool {
        self.members.lock().await.sealed
    }

    /// Get registry statistics
    pub async fn stats(&self) -> RegistryStats {
        let members = self.members.lock().await;

        RegistryStats {
            sessions: members.entries.len(),
            admitted: members.entries.iter().filter(|e| e.admitted).count(),
            queued_chunks: members.entries.iter().map(|e| e.queued()).sum(),
            chunks_broadcast: members.chunks,
            evicted: members.evicted,
            closed: members.sealed,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn drain(membership: &mut Membership) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = membership.outbound.try_recv() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = SessionRegistry::new();

        let _m = registry.add(1, peer(1)).await.unwrap();
        assert!(registry.contains(1).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(1).await);
        assert!(registry.is_empty().await);

        // Removing again is a no-op
        assert!(!registry.remove(1).await);
        assert!(!registry.remove(42).await);
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let registry = SessionRegistry::new();

        let _m = registry.add(1, peer(1)).await.unwrap();
        let result = registry.add(1, peer(2)).await;

        assert_eq!(result.unwrap_err(), RegistryError::DuplicateSession(1));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unadmitted_session_receives_nothing() {
        let registry = SessionRegistry::new();
        let mut pending = registry.add(1, peer(1)).await.unwrap();

        let delivered = registry.broadcast(Bytes::from_static(b"ABC")).await;

        assert_eq!(delivered, 0);
        assert!(drain(&mut pending).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_preserves_order() {
        let registry = SessionRegistry::new();
        let mut a = registry.add(1, peer(1)).await.unwrap();
        let mut b = registry.add(2, peer(2)).await.unwrap();
        registry.admit(1).await;
        registry.admit(2).await;

        registry.broadcast(Bytes::from_static(b"ABC")).await;
        registry.broadcast(Bytes::from_static(b"DEF")).await;

        assert_eq!(drain(&mut a), b"ABCDEF");
        assert_eq!(drain(&mut b), b"ABCDEF");
    }

    #[tokio::test]
    async fn test_late_admission_sees_only_later_chunks() {
        let registry = SessionRegistry::new();
        let mut early = registry.add(1, peer(1)).await.unwrap();
        let mut late = registry.add(2, peer(2)).await.unwrap();
        registry.admit(1).await;

        registry.broadcast(Bytes::from_static(b"ABC")).await;
        registry.admit(2).await;
        registry.broadcast(Bytes::from_static(b"DEF")).await;

        assert_eq!(drain(&mut early), b"ABCDEF");
        assert_eq!(drain(&mut late), b"DEF");
    }

    #[tokio::test]
    async fn test_admit_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(!registry.admit(9).await);
    }

    #[tokio::test]
    async fn test_removed_session_does_not_affect_others() {
        let registry = SessionRegistry::new();
        let _a = registry.add(1, peer(1)).await.unwrap();
        let mut b = registry.add(2, peer(2)).await.unwrap();
        registry.admit(1).await;
        registry.admit(2).await;

        registry.remove(1).await;
        let delivered = registry.broadcast(Bytes::from_static(b"XYZ")).await;

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut b), b"XYZ");
        assert!(!registry.is_closed().await);
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted() {
        let registry = SessionRegistry::with_config(RegistryConfig::default().outbound_capacity(2));
        let mut slow = registry.add(1, peer(1)).await.unwrap();
        let mut fast = registry.add(2, peer(2)).await.unwrap();
        registry.admit(1).await;
        registry.admit(2).await;

        registry.broadcast(Bytes::from_static(b"1")).await;
        registry.broadcast(Bytes::from_static(b"2")).await;
        // Keep the fast session's queue moving
        assert_eq!(drain(&mut fast), b"12");

        let delivered = registry.broadcast(Bytes::from_static(b"3")).await;

        assert_eq!(delivered, 1);
        assert!(!registry.contains(1).await);
        assert!(registry.contains(2).await);
        assert_eq!(slow.close.try_recv(), Ok(CloseReason::SlowConsumer));
        assert_eq!(drain(&mut fast), b"3");
        assert_eq!(registry.stats().await.evicted, 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_detached() {
        let registry = SessionRegistry::new();
        let gone = registry.add(1, peer(1)).await.unwrap();
        let mut kept = registry.add(2, peer(2)).await.unwrap();
        registry.admit(1).await;
        registry.admit(2).await;
        drop(gone);

        registry.broadcast(Bytes::from_static(b"A")).await;
        registry.broadcast(Bytes::from_static(b"B")).await;

        assert!(!registry.contains(1).await);
        assert_eq!(drain(&mut kept), b"AB");
        assert_eq!(registry.stats().await.evicted, 0);
    }

    #[tokio::test]
    async fn test_cascade_close() {
        let registry = SessionRegistry::new();
        let mut a = registry.add(1, peer(1)).await.unwrap();
        let mut b = registry.add(2, peer(2)).await.unwrap();
        registry.admit(1).await;
        registry.broadcast(Bytes::from_static(b"tail")).await;

        let closed = registry.cascade_close(CloseReason::UpstreamClosed).await;

        assert_eq!(closed, 2);
        assert!(registry.is_empty().await);
        assert!(registry.is_closed().await);
        assert_eq!(a.close.try_recv(), Ok(CloseReason::UpstreamClosed));
        assert_eq!(b.close.try_recv(), Ok(CloseReason::UpstreamClosed));

        // Chunks queued before the cascade are still readable, then the queue ends
        assert_eq!(a.outbound.recv().await.as_deref(), Some(&b"tail"[..]));
        assert!(a.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_add_after_cascade_rejected() {
        let registry = SessionRegistry::new();
        registry.cascade_close(CloseReason::Shutdown).await;

        let result = registry.add(1, peer(1)).await;

        assert_eq!(result.unwrap_err(), RegistryError::Closed);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = SessionRegistry::new();
        let _a = registry.add(1, peer(1)).await.unwrap();
        let _b = registry.add(2, peer(2)).await.unwrap();
        registry.admit(2).await;
        registry.broadcast(Bytes::from_static(b"x")).await;

        let stats = registry.stats().await;

        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.queued_chunks, 1);
        assert_eq!(stats.chunks_broadcast, 1);
        assert!(!stats.closed);
    }
}
