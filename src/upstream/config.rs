//! Upstream configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::constants::READ_SIZE;

/// Origin location and feed tuning
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Origin host name or IP address
    pub host: String,

    /// Origin port
    pub port: u16,

    /// Resource path requested from the origin
    pub path: String,

    /// Maximum bytes per read, and so per broadcast chunk
    pub read_size: usize,

    /// Time allowed for the initial connection
    pub connect_timeout: Duration,

    /// Enable TCP_NODELAY on the upstream socket
    pub tcp_nodelay: bool,
}

impl UpstreamConfig {
    /// Create a config for `host:port` and `path`
    ///
    /// An empty path requests `/`.
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            host: host.into(),
            port,
            path: if path.is_empty() { "/".to_string() } else { path },
            read_size: READ_SIZE,
            connect_timeout: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }

    /// Set the per-read size (minimum 1)
    pub fn read_size(mut self, size: usize) -> Self {
        self.read_size = size.max(1);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `host:port`, for logging and error reports
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the config before connecting
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("upstream host is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("upstream port must be non-zero".into()));
        }
        if self.path.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "upstream path {:?} contains whitespace",
                self.path
            )));
        }
        Ok(())
    }
}
