//! Downstream session
//!
//! One task per accepted client. The session frames the request head, is
//! admitted to the registry, writes the fixed response preamble and then
//! copies broadcast chunks to the socket until something closes it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::state::{CloseReason, SessionState};
use crate::error::{Error, Result};
use crate::protocol::constants::RESPONSE_PREAMBLE;
use crate::protocol::{RequestFramer, RequestHead};
use crate::registry::{Membership, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::stats::SessionStats;

/// Outcome of the framing phase
enum Framed {
    Request(RequestHead),
    Closed(CloseReason),
}

/// A single downstream client
pub struct DownstreamSession<S> {
    state: SessionState,
    stream: S,
    framer: RequestFramer,
    membership: Membership,
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
}

impl<S> DownstreamSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session for a connection already added to `registry`
    pub fn new(
        peer_addr: SocketAddr,
        stream: S,
        membership: Membership,
        registry: Arc<SessionRegistry>,
        config: ServerConfig,
    ) -> Self {
        Self {
            state: SessionState::new(membership.id, peer_addr),
            stream,
            framer: RequestFramer::with_max_header_size(config.max_header_size),
            membership,
            registry,
            config,
        }
    }

    /// Run the session to completion
    ///
    /// The session always leaves the registry before this returns. Framing
    /// failures and transport errors come back as errors; every other way of
    /// closing is reported as a [`CloseReason`].
    pub async fn run(mut self) -> Result<CloseReason> {
        let result = self.serve().await;

        self.state.close();
        self.registry.remove(self.state.id).await;

        if let Ok(reason) = &result {
            let stats = self.stats();
            tracing::debug!(
                reason = %reason,
                bytes_sent = stats.bytes_sent,
                chunks_sent = stats.chunks_sent,
                bytes_discarded = stats.bytes_discarded,
                bitrate = stats.bitrate,
                duration_ms = stats.duration.as_millis() as u64,
                "Session closed"
            );
        }

        result
    }

    /// Current statistics
    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            bytes_received: self.state.bytes_received,
            bytes_sent: self.state.bytes_sent,
            chunks_sent: self.state.chunks_sent,
            bytes_discarded: self.framer.discarded(),
            duration: self.state.duration(),
            bitrate: 0,
        };
        stats.calculate_bitrate();
        stats
    }

    async fn serve(&mut self) -> Result<CloseReason> {
        let request = match self.read_request().await? {
            Framed::Request(request) => request,
            Framed::Closed(reason) => return Ok(reason),
        };

        if !self.registry.admit(self.state.id).await {
            // Removed between accept and admission, most likely by a cascade
            let reason = self
                .membership
                .close
                .try_recv()
                .unwrap_or(CloseReason::Detached);
            return Ok(reason);
        }

        tracing::info!(
            method = %request.method,
            path = %request.path,
            version = %request.version,
            user_agent = request.header("user-agent").unwrap_or("-"),
            "Request accepted"
        );
        self.state.admit(request);

        self.stream
            .write_all(RESPONSE_PREAMBLE)
            .await
            .map_err(Error::DownstreamTransport)?;

        self.stream_broadcasts().await
    }

    /// Accumulate input until a complete request head arrives
    async fn read_request(&mut self) -> Result<Framed> {
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            let read = tokio::select! {
                biased;
                signal = &mut self.membership.close => {
                    return Ok(Framed::Closed(signal.unwrap_or(CloseReason::Detached)));
                }
                read = self.stream.read(&mut buf) => read,
            };

            let n = read.map_err(Error::DownstreamTransport)?;
            if n == 0 {
                return Ok(Framed::Closed(CloseReason::RemoteClosed));
            }
            self.state.bytes_received += n as u64;

            if let Some(request) = self.framer.process(&buf[..n])? {
                return Ok(Framed::Request(request));
            }
        }
    }

    /// Copy broadcast chunks to the client until closed
    async fn stream_broadcasts(&mut self) -> Result<CloseReason> {
        let Self {
            state,
            stream,
            framer,
            membership,
            config,
            ..
        } = self;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut discard = vec![0u8; config.read_buffer_size];

        loop {
            tokio::select! {
                biased;
                signal = &mut membership.close => {
                    let reason = signal.unwrap_or(CloseReason::Detached);
                    if reason.flushes_pending() {
                        drain_queue(&mut writer, &mut membership.outbound, state, config).await;
                    }
                    return Ok(reason);
                }
                chunk = membership.outbound.recv() => {
                    let Some(chunk) = chunk else {
                        return Ok(CloseReason::Detached);
                    };

                    let write = writer.write_all(&chunk);
                    tokio::pin!(write);
                    let signal = tokio::select! {
                        biased;
                        written = &mut write => {
                            written.map_err(Error::DownstreamTransport)?;
                            None
                        }
                        signal = &mut membership.close => Some(signal.unwrap_or(CloseReason::Detached)),
                    };

                    if let Some(reason) = signal {
                        if !reason.flushes_pending() {
                            return Ok(reason);
                        }
                        // Finish the chunk already in flight before draining the rest
                        write.await.map_err(Error::DownstreamTransport)?;
                        state.on_sent(chunk.len());
                        drain_queue(&mut writer, &mut membership.outbound, state, config).await;
                        return Ok(reason);
                    }

                    state.on_sent(chunk.len());
                }
                read = reader.read(&mut discard) => match read {
                    Ok(0) => return Ok(CloseReason::RemoteClosed),
                    Ok(n) => {
                        state.bytes_received += n as u64;
                        framer.process(&discard[..n])?;
                    }
                    Err(e) => return Err(Error::DownstreamTransport(e)),
                },
            }
        }
    }
}

/// Write out chunks still queued after the upstream ended, then close the
/// write side
///
/// Bounded by the drain timeout so a stalled client cannot hold the session
/// open.
async fn drain_queue<W>(
    writer: &mut W,
    outbound: &mut mpsc::Receiver<Bytes>,
    state: &mut SessionState,
    config: &ServerConfig,
) where
    W: AsyncWrite + Unpin,
{
    let drain = async {
        while let Some(chunk) = outbound.recv().await {
            writer.write_all(&chunk).await?;
            state.on_sent(chunk.len());
        }
        writer.shutdown().await
    };

    match tokio::time::timeout(config.drain_timeout, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Drain failed"),
        Err(_) => tracing::debug!(
            timeout_ms = config.drain_timeout.as_millis() as u64,
            "Drain timed out"
        ),
    }
}
