//! Downstream request framing
//!
//! A client must send a complete request head before it is admitted to the
//! broadcast:
//!
//! ```text
//! Client                                   Relay
//!   |                                        |
//!   |-- GET <path> HTTP/1.x\r\n ------------>|  AwaitingHeader
//!   |-- <header lines>\r\n ----------------->|  (accumulate, cap 16 KiB)
//!   |-- \r\n ------------------------------->|
//!   |                                        |
//!   |<----------------- HTTP/1.0 200 OK\r\n -|  Streaming
//!   |<-- Content-type: application/... \r\n -|
//!   |<------------------------------- \r\n --|
//!   |<----------------- <broadcast bytes> ---|
//! ```
//!
//! The framer is a pure state machine over byte slices; the session owns the
//! socket and decides what to do with the outcome.

use bytes::BytesMut;

use super::constants::{HEADER_TERMINATOR, MAX_HEADER_SIZE};
use super::request::RequestHead;
use crate::error::FramingError;

/// Framing progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingState {
    /// Accumulating the request head
    AwaitingHeader,
    /// Head accepted; further input is discarded
    Streaming,
}

/// Request head accumulator
#[derive(Debug)]
pub struct RequestFramer {
    state: FramingState,
    buffer: BytesMut,
    max_header_size: usize,
    /// Inbound bytes thrown away after the head
    discarded: u64,
}

impl RequestFramer {
    /// Create a framer with the default 16 KiB head cap
    pub fn new() -> Self {
        Self::with_max_header_size(MAX_HEADER_SIZE)
    }

    /// Create a framer with a custom head cap
    pub fn with_max_header_size(max_header_size: usize) -> Self {
        Self {
            state: FramingState::AwaitingHeader,
            buffer: BytesMut::new(),
            max_header_size,
            discarded: 0,
        }
    }

    /// Bytes discarded after the head was accepted
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed received bytes
    ///
    /// Returns the parsed head once the terminator arrives, `None` while more
    /// data is needed or after the head was already accepted. Any bytes after
    /// the terminator are dropped.
    pub fn process(&mut self, data: &[u8]) -> Result<Option<RequestHead>, FramingError> {
        match self.state {
            FramingState::AwaitingHeader => self.process_header(data),
            FramingState::Streaming => {
                self.discarded += data.len() as u64;
                Ok(None)
            }
        }
    }

    fn process_header(&mut self, data: &[u8]) -> Result<Option<RequestHead>, FramingError> {
        // The terminator may straddle the previous read
        let search_from = self
            .buffer
            .len()
            .saturating_sub(HEADER_TERMINATOR.len() - 1);

        // Never hold more than a maximal head plus its terminator, however
        // large the read
        let room = (self.max_header_size + HEADER_TERMINATOR.len())
            .saturating_sub(self.buffer.len());
        let (taken, rest) = data.split_at(data.len().min(room));
        self.buffer.extend_from_slice(taken);

        let Some(pos) = find_terminator(&self.buffer[search_from..]) else {
            if self.buffer.len() > self.max_header_size {
                return Err(FramingError::HeaderTooLarge {
                    size: self.buffer.len() + rest.len(),
                    limit: self.max_header_size,
                });
            }
            return Ok(None);
        };

        let head_len = search_from + pos;
        if head_len > self.max_header_size {
            return Err(FramingError::HeaderTooLarge {
                size: head_len,
                limit: self.max_header_size,
            });
        }

        let head = RequestHead::parse(&self.buffer[..head_len])?;

        let trailing = self.buffer.len() - head_len - HEADER_TERMINATOR.len() + rest.len();
        self.discarded += trailing as u64;
        self.buffer = BytesMut::new();
        self.state = FramingState::Streaming;

        Ok(Some(head))
    }
}

impl Default for RequestFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}
