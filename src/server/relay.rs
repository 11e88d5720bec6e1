//! Relay dispatcher
//!
//! Owns the registry and drives the upstream feed and the listener on the
//! same task. Whichever of feed, accept loop, or shutdown finishes first
//! decides how the relay stops.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::Instrument;

use crate::error::Result;
use crate::registry::{RegistryConfig, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::server::listener::Listener;
use crate::session::CloseReason;
use crate::upstream::{UpstreamConfig, UpstreamFeed};

/// One upstream feed fanned out to every accepted client
pub struct Relay {
    server_config: ServerConfig,
    upstream_config: UpstreamConfig,
    registry: Arc<SessionRegistry>,
}

impl Relay {
    /// Create a relay with the default registry settings
    pub fn new(server_config: ServerConfig, upstream_config: UpstreamConfig) -> Self {
        Self::with_registry_config(server_config, upstream_config, RegistryConfig::default())
    }

    /// Create a relay with custom registry settings
    pub fn with_registry_config(
        server_config: ServerConfig,
        upstream_config: UpstreamConfig,
        registry_config: RegistryConfig,
    ) -> Self {
        Self {
            server_config,
            upstream_config,
            registry: Arc::new(SessionRegistry::with_config(registry_config)),
        }
    }

    /// Get the session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run until the upstream ends
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until the upstream ends or `shutdown` completes
    ///
    /// The upstream is connected before the listener is bound, so an
    /// unreachable origin never accepts a client.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let feed = UpstreamFeed::connect(self.upstream_config.clone()).await?;

        let listener = TcpListener::bind(self.server_config.bind_addr).await?;
        tracing::info!(addr = %self.server_config.bind_addr, "Listening");

        self.serve(feed, listener, shutdown).await
    }

    /// Drive an already connected feed and a bound listener
    ///
    /// Returns `Ok(())` on shutdown and the feed's error when the upstream
    /// goes away. Either way the registry is empty and sealed on return, and
    /// every session task has finished, so bytes queued before the upstream
    /// closed have been flushed (within `drain_timeout`).
    pub async fn serve<S, F>(
        &self,
        feed: UpstreamFeed<S>,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut listener = Listener::new(
            listener,
            self.server_config.clone(),
            Arc::clone(&self.registry),
        );
        let feed_span = tracing::info_span!("feed", upstream = %feed.config().addr());
        let listener_span = match listener.local_addr() {
            Ok(addr) => tracing::info_span!("listener", addr = %addr),
            Err(_) => tracing::info_span!("listener"),
        };

        let result = tokio::select! {
            _ = shutdown => {
                // The feed future is dropped here, which closes the upstream socket
                tracing::info!("Shutdown signal received");
                let closed = self.registry.cascade_close(CloseReason::Shutdown).await;
                tracing::debug!(sessions_closed = closed, "Sessions closed");
                Ok(())
            }
            result = feed.run(&self.registry).instrument(feed_span) => result,
            _ = listener.accept_loop().instrument(listener_span) => Ok(()),
        };

        // Sessions flush their queues here; the caller may drop the runtime next
        let aborted = listener
            .join_sessions(self.server_config.drain_timeout)
            .await;
        drop(listener);

        let stats = self.registry.stats().await;
        tracing::info!(
            sessions_aborted = aborted,
            chunks_broadcast = stats.chunks_broadcast,
            evicted = stats.evicted,
            "Listener closed"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::error::Error;

    fn relay() -> Relay {
        Relay::new(
            ServerConfig::default(),
            UpstreamConfig::new("origin", 80, "/"),
        )
    }

    #[tokio::test]
    async fn test_upstream_unavailable_is_fatal() {
        let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = vacant.local_addr().unwrap().port();
        drop(vacant);

        let relay = Relay::new(
            ServerConfig::with_addr("127.0.0.1:0".parse().unwrap()),
            UpstreamConfig::new("127.0.0.1", port, "/"),
        );
        let result = relay.run().await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let relay = relay();
        let (client, _origin) = duplex(1024);
        let feed = UpstreamFeed::new(client, UpstreamConfig::new("origin", 80, "/"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let registry = Arc::clone(relay.registry());
        let client_task = tokio::spawn(async move {
            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
            while registry.admitted_count().await < 1 {
                tokio::task::yield_now().await;
            }
            stop_tx.send(()).unwrap();

            let mut received = Vec::new();
            let _ = socket.read_to_end(&mut received).await;
            received
        });

        let result = relay
            .serve(feed, listener, async {
                let _ = stop_rx.await;
            })
            .await;

        assert!(result.is_ok());
        assert!(relay.registry().is_closed().await);
        assert!(relay.registry().is_empty().await);

        // Preamble only, then end of stream
        let received = client_task.await.unwrap();
        assert_eq!(received, crate::protocol::constants::RESPONSE_PREAMBLE);
    }

    #[tokio::test]
    async fn test_upstream_close_ends_serve() {
        let relay = relay();
        let (client, origin) = duplex(1024);
        let feed = UpstreamFeed::new(client, UpstreamConfig::new("origin", 80, "/"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        drop(origin);

        let result = relay
            .serve(feed, listener, std::future::pending())
            .await;

        assert!(matches!(result, Err(Error::UpstreamClosed { bytes: 0, .. })));
        assert!(relay.registry().is_closed().await);
    }

    #[tokio::test]
    async fn test_serve_returns_after_sessions_flush() {
        let relay = relay();
        let (client, mut origin) = duplex(1024);
        let feed = UpstreamFeed::new(client, UpstreamConfig::new("origin", 80, "/"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

        let script = async {
            while relay.registry().admitted_count().await < 1 {
                tokio::task::yield_now().await;
            }
            origin.write_all(b"last words").await.unwrap();
            drop(origin);
        };
        let (result, ()) = tokio::join!(
            relay.serve(feed, listener, std::future::pending()),
            script
        );

        assert!(matches!(result, Err(Error::UpstreamClosed { bytes: 10, .. })));

        // The session flushed and closed before serve returned
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        assert!(received.ends_with(b"last words"));
    }
}
