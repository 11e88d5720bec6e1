//! Request heads
//!
//! Parses the downstream request head and builds the upstream request.

use bytes::Bytes;

use super::constants::HTTP_VERSION;
use crate::error::FramingError;

/// A parsed downstream request head
///
/// The relay answers every request the same way; the fields are kept for
/// logging only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method (e.g., "GET")
    pub method: String,
    /// Requested path
    pub path: String,
    /// Protocol version token
    pub version: String,
    /// Header lines in arrival order, never interpreted
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse the bytes preceding the `\r\n\r\n` terminator
    ///
    /// The request line must split on whitespace into exactly three tokens.
    /// Header lines without a colon are skipped.
    pub fn parse(head: &[u8]) -> Result<Self, FramingError> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

        let request_line = lines.next().unwrap_or_default();
        let tokens: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, version] = tokens.as_slice() else {
            return Err(FramingError::MalformedRequestLine(request_line.to_string()));
        };

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Build the request sent to the origin: `GET <path> HTTP/1.0\r\n\r\n`
pub fn upstream_request(path: &str) -> Bytes {
    Bytes::from(format!("GET {} {}\r\n\r\n", path, HTTP_VERSION))
}
