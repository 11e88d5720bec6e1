//! Wire constants for the HTTP/1.0 surfaces on both sides of the relay

/// End of a request head
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Default cap on an un-terminated request head
pub const MAX_HEADER_SIZE: usize = 16384;

/// Default upstream read size per chunk
pub const READ_SIZE: usize = 1024;

/// Default listen port when none (or zero) is given
pub const DEFAULT_LISTEN_PORT: u16 = 80;

/// Fixed response sent to every admitted client
pub const RESPONSE_PREAMBLE: &[u8] =
    b"HTTP/1.0 200 OK\r\nContent-type: application/octet-stream\r\n\r\n";

/// Protocol version used for the upstream request
pub const HTTP_VERSION: &str = "HTTP/1.0";
