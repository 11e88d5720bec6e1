//! Downstream listener
//!
//! Handles the TCP accept loop and spawns a session task per connection.
//! Session tasks are kept in a `JoinSet` so the relay can wait for them to
//! finish draining before it returns.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::server::config::ServerConfig;
use crate::session::DownstreamSession;

/// Pause after an accept error that is not specific to one connection
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts clients and registers a session for each
pub struct Listener {
    inner: TcpListener,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    sessions: JoinSet<()>,
}

impl Listener {
    /// Wrap a bound TCP listener
    pub fn new(inner: TcpListener, config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            inner,
            config,
            registry,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            sessions: JoinSet::new(),
        }
    }

    /// Get the bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Error::Io)
    }

    /// Number of session tasks not yet reaped
    pub fn session_tasks(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections until the future is dropped
    pub async fn accept_loop(&mut self) {
        loop {
            match self.inner.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    if let Some(pause) = accept_backoff(&e) {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
    }

    /// Wait for every session task to finish
    ///
    /// Tasks still running after `timeout` are aborted. Returns how many were
    /// aborted.
    pub async fn join_sessions(&mut self, timeout: Duration) -> usize {
        let sessions = &mut self.sessions;
        let joined = tokio::time::timeout(timeout, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if joined.is_ok() {
            return 0;
        }

        let aborted = self.sessions.len();
        tracing::warn!(
            sessions = aborted,
            timeout_ms = timeout.as_millis() as u64,
            "Aborting sessions still running"
        );
        self.sessions.shutdown().await;
        aborted
    }

    async fn handle_connection(&mut self, socket: TcpStream, peer_addr: SocketAddr) {
        // Reap finished sessions so the set only holds live ones
        while self.sessions.try_join_next().is_some() {}

        // Check connection limit; the permit lives as long as the session
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let membership = match self.registry.add(session_id, peer_addr).await {
            Ok(membership) => membership,
            Err(e) => {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection refused"
                );
                return;
            }
        };

        let session = DownstreamSession::new(
            peer_addr,
            socket,
            membership,
            Arc::clone(&self.registry),
            self.config.clone(),
        );
        let span = tracing::info_span!("session", id = session_id, peer = %peer_addr);

        self.sessions.spawn(
            async move {
                let _permit = permit;
                if let Err(e) = session.run().await {
                    tracing::debug!(error = %e, "Session error");
                }
            }
            .instrument(span),
        );
    }

    fn configure_socket(&self, socket: &TcpStream) -> io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// Backoff for an accept error, if any
///
/// Errors tied to a single aborted handshake are retried at once. Anything
/// else, such as running out of file descriptors, would fail again
/// immediately, so the loop pauses.
fn accept_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}
