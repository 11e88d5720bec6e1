//! Upstream feed reader
//!
//! Connects to the origin, sends `GET <path> HTTP/1.0\r\n\r\n`, then forwards
//! every chunk it reads to the registry unmodified. When the origin goes away
//! the feed cascade-closes all sessions; there is no reconnect.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::protocol::upstream_request;
use crate::registry::SessionRegistry;
use crate::session::CloseReason;
use crate::stats::FeedStats;

/// The single connection to the origin
pub struct UpstreamFeed<S = TcpStream> {
    stream: S,
    config: UpstreamConfig,
    stats: FeedStats,
}

impl UpstreamFeed<TcpStream> {
    /// Connect to the origin and send the request
    ///
    /// Any failure here is reported as [`Error::UpstreamUnavailable`].
    pub async fn connect(config: UpstreamConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.addr();

        let connect = TcpStream::connect((config.host.as_str(), config.port));
        let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(Error::UpstreamUnavailable { addr, source }),
            Err(_) => {
                return Err(Error::UpstreamUnavailable {
                    addr,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        if config.tcp_nodelay {
            stream
                .set_nodelay(true)
                .map_err(|source| Error::UpstreamUnavailable {
                    addr: addr.clone(),
                    source,
                })?;
        }

        tracing::info!(upstream = %addr, path = %config.path, "Upstream connected");

        let mut feed = Self::new(stream, config);
        feed.send_request().await?;
        Ok(feed)
    }
}

impl<S> UpstreamFeed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected transport
    pub fn new(stream: S, config: UpstreamConfig) -> Self {
        let stats = FeedStats::new(config.addr());
        Self {
            stream,
            config,
            stats,
        }
    }

    /// Get the feed configuration
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Write the request and wait until the transport has taken all of it
    pub async fn send_request(&mut self) -> Result<()> {
        let request = upstream_request(&self.config.path);

        let sent = match self.stream.write_all(&request).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        sent.map_err(|source| Error::UpstreamUnavailable {
            addr: self.config.addr(),
            source,
        })?;

        tracing::debug!(bytes = request.len(), "Upstream request sent");
        Ok(())
    }

    /// Relay chunks until the origin stops
    ///
    /// Every session in `registry` is closed before this returns. The returned
    /// error is always [`Error::UpstreamClosed`]; its source is set when a read
    /// failed rather than the origin closing cleanly.
    pub async fn run(self, registry: &SessionRegistry) -> Result<()> {
        let Self {
            mut stream,
            config,
            mut stats,
        } = self;
        let mut buf = vec![0u8; config.read_size];

        let source = loop {
            match stream.read(&mut buf).await {
                Ok(0) => break None,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    let delivered = registry.broadcast(chunk).await;
                    stats.on_chunk(n, delivered);
                }
                Err(e) => break Some(e),
            }
        };

        // Release the upstream socket before the sessions go
        drop(stream);

        let closed = registry.cascade_close(CloseReason::UpstreamClosed).await;

        match &source {
            Some(e) => tracing::error!(
                upstream = %stats.upstream,
                error = %e,
                bytes = stats.bytes_received,
                sessions_closed = closed,
                "Upstream read failed"
            ),
            None => tracing::info!(
                upstream = %stats.upstream,
                bytes = stats.bytes_received,
                chunks = stats.chunks,
                average_fanout = stats.average_fanout(),
                bitrate = stats.bitrate(),
                duration_ms = stats.duration().as_millis() as u64,
                sessions_closed = closed,
                "Upstream closed"
            ),
        }

        Err(Error::UpstreamClosed {
            addr: stats.upstream,
            bytes: stats.bytes_received,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::io::duplex;
    use tokio::net::TcpListener;

    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6000)
    }

    #[tokio::test]
    async fn test_send_request() {
        let (client, mut origin) = duplex(1024);
        let mut feed = UpstreamFeed::new(client, UpstreamConfig::new("origin", 80, "/stream"));

        feed.send_request().await.unwrap();

        let mut request = [0u8; 24];
        origin.read_exact(&mut request).await.unwrap();
        assert_eq!(&request, b"GET /stream HTTP/1.0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_run_broadcasts_then_cascades() {
        let registry = SessionRegistry::new();
        let mut member = registry.add(1, peer()).await.unwrap();
        registry.admit(1).await;

        let (client, mut origin) = duplex(1024);
        let feed = UpstreamFeed::new(client, UpstreamConfig::new("origin", 80, "/"));
        origin.write_all(b"HTTP/1.0 200 OK\r\n\r\nABC").await.unwrap();
        drop(origin);

        let err = feed.run(&registry).await.unwrap_err();

        assert!(matches!(
            err,
            Error::UpstreamClosed {
                bytes: 22,
                source: None,
                ..
            }
        ));
        assert!(registry.is_empty().await);
        assert!(registry.is_closed().await);
        assert_eq!(member.close.try_recv(), Ok(CloseReason::UpstreamClosed));

        // Origin bytes, header included, are forwarded untouched
        let mut received = Vec::new();
        while let Some(chunk) = member.outbound.recv().await {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, b"HTTP/1.0 200 OK\r\n\r\nABC");
    }

    #[tokio::test]
    async fn test_read_size_bounds_chunks() {
        let registry = SessionRegistry::new();
        let mut member = registry.add(1, peer()).await.unwrap();
        registry.admit(1).await;

        let (client, mut origin) = duplex(1024);
        let feed = UpstreamFeed::new(client, UpstreamConfig::new("origin", 80, "/").read_size(2));
        origin.write_all(b"ABCDE").await.unwrap();
        drop(origin);

        let _ = feed.run(&registry).await;

        let mut chunks = Vec::new();
        while let Some(chunk) = member.outbound.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["AB", "CD", "E"]);
    }

    #[tokio::test]
    async fn test_connect_sends_request() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = origin.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = origin.accept().await.unwrap();
            let mut request = vec![0u8; 22];
            socket.read_exact(&mut request).await.unwrap();
            request
        });

        let feed = UpstreamFeed::connect(UpstreamConfig::new("127.0.0.1", port, "/live"))
            .await
            .unwrap();

        assert_eq!(feed.config().path, "/live");
        assert_eq!(accept.await.unwrap(), b"GET /live HTTP/1.0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        // Grab a free port, then release it so nothing is listening
        let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = vacant.local_addr().unwrap().port();
        drop(vacant);

        let result = UpstreamFeed::connect(UpstreamConfig::new("127.0.0.1", port, "/")).await;

        assert!(matches!(result, Err(Error::UpstreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_connect_invalid_config() {
        let result = UpstreamFeed::connect(UpstreamConfig::new("", 80, "/")).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
