//! Multiplexed transport capability.
//!
//! # Data Flow
//! ```text
//! Edge ══ one transport connection ══▶ MuxTransport
//!                                          ├─ accept()  → MuxedStream (headers + body)
//!                                          ├─ probe()   → heartbeat ack
//!                                          └─ close()
//! ```
//!
//! # Design Decisions
//! - Frame encoding, flow control and handshake belong to the transport, not here
//! - A stream's body is plain `AsyncRead`/`AsyncWrite`; headers are a separate call
//! - The transport guarantees that concurrent writers never interleave partial frames
//! - `memory.rs` is an in-process implementation with an edge half for driving it

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// A single header carried on a multiplexed stream.
///
/// Headers are kept as an ordered sequence because order and duplicate names
/// are significant on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Look up the first header with `name` (ASCII case-insensitive).
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Errors raised by the transport or by one of its streams.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport connection is gone; no more streams will arrive.
    #[error("transport closed")]
    Closed,

    /// A liveness probe went unanswered.
    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),

    /// Response headers can be written only once per stream.
    #[error("response headers already sent on stream {0}")]
    HeadersAlreadySent(u32),

    /// The peer reset the stream before headers could be exchanged.
    #[error("stream {0} reset by peer")]
    StreamReset(u32),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write half of a stream: one header block, then the response body.
///
/// Shutting down the writer ends the response.
#[async_trait]
pub trait ResponseWriter: AsyncWrite + Send + Unpin + 'static {
    /// Send the response header block. Must precede any body bytes.
    async fn write_headers(&mut self, headers: Vec<Header>) -> Result<(), TransportError>;
}

/// One logical stream carried by the transport.
pub trait MuxedStream: Send + 'static {
    /// Request body sent by the edge.
    type Reader: AsyncRead + Send + Unpin + 'static;

    /// Response path back to the edge.
    type Writer: ResponseWriter;

    /// Transport-assigned identifier, for observability only.
    fn stream_id(&self) -> u32;

    /// Headers the edge opened the stream with.
    fn request_headers(&self) -> &[Header];

    /// Separate the request body from the response path so both can be
    /// driven at once.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// The connection-level half of the transport.
#[async_trait]
pub trait MuxTransport: Send + Sync + 'static {
    type Stream: MuxedStream;

    /// Wait for the edge to open the next stream.
    ///
    /// Must be cancel-safe: the accept loop drops and re-creates this future.
    /// An error here is fatal for the whole connection.
    async fn accept(&self) -> Result<Self::Stream, TransportError>;

    /// Send a liveness probe and wait for its acknowledgement.
    ///
    /// Callers bound the wait with their own deadline.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Tear the transport down. Idempotent.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_header_is_case_insensitive_and_returns_first() {
        let headers = vec![
            Header::new("X-Thing", "one"),
            Header::new("x-thing", "two"),
        ];
        assert_eq!(find_header(&headers, "x-thing"), Some("one"));
        assert_eq!(find_header(&headers, "missing"), None);
    }
}
