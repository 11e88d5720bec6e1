//! Error types
//!
//! Downstream errors (framing, transport) stay inside the session that raised
//! them. Upstream errors end the relay.

use std::io;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Listener-level I/O failure (bind, local address lookup)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Client request could not be framed
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Initial connection to the origin failed
    #[error("upstream {addr} unavailable: {source}")]
    UpstreamUnavailable {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Origin closed the connection or a read failed after connecting
    #[error("upstream {addr} closed after {bytes} bytes")]
    UpstreamClosed {
        addr: String,
        bytes: u64,
        #[source]
        source: Option<io::Error>,
    },

    /// Read or write on a single downstream connection failed
    #[error("downstream transport error: {0}")]
    DownstreamTransport(#[source] io::Error),

    /// Registry refused the operation
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Request framing failures
///
/// Both variants close the connection without sending a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Accumulated request head exceeded the cap before or at the terminator
    #[error("request header too large: {size} bytes exceeds limit of {limit}")]
    HeaderTooLarge { size: usize, limit: usize },

    /// Request line did not split into exactly method, path and version
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
}

impl Error {
    /// Whether the upstream was never reached or has gone away
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable { .. } | Error::UpstreamClosed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_errors_are_fatal() {
        let unavailable = Error::UpstreamUnavailable {
            addr: "origin:80".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        let closed = Error::UpstreamClosed {
            addr: "origin:80".into(),
            bytes: 10,
            source: None,
        };

        assert!(unavailable.is_upstream());
        assert!(closed.is_upstream());
        assert!(!Error::Framing(FramingError::MalformedRequestLine("GET".into())).is_upstream());
    }

    #[test]
    fn test_display_messages() {
        let err = FramingError::HeaderTooLarge {
            size: 16385,
            limit: 16384,
        };
        assert_eq!(
            err.to_string(),
            "request header too large: 16385 bytes exceeds limit of 16384"
        );

        let err = Error::UpstreamClosed {
            addr: "origin:8000".into(),
            bytes: 42,
            source: None,
        };
        assert_eq!(err.to_string(), "upstream origin:8000 closed after 42 bytes");
    }
}
