//! Stream handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted MuxedStream
//!     → dispatcher.rs (one task per stream)
//!     → request.rs (stream headers → StreamRequest)
//!     → origin (HTTP exchange or WebSocket upgrade)
//!     → response.rs (status + provenance + headers, then body)
//!     → websocket.rs (byte bridge, upgrades only)
//! ```
//!
//! # Design Decisions
//! - A stream never shares mutable state with another stream
//! - Every stream ends with exactly one response header block
//! - Failures stay inside the stream's task and surface as `StreamOutcome`

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod websocket;

use thiserror::Error;

use crate::mux::TransportError;
use crate::origin::OriginError;

pub use dispatcher::{serve_stream, StreamKind, StreamOutcome};
pub use request::{build_request, MalformedRequest, StreamRequest};
pub use response::{Provenance, StreamResponse, RESPONSE_META_HEADER};
pub use websocket::{bridge, BridgeError};

/// Per-stream failures. None of these affect other streams or the connection.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed request: {0}")]
    Malformed(#[from] MalformedRequest),

    #[error(transparent)]
    Origin(#[from] OriginError),

    #[error("failed to write response headers: {0}")]
    WriteHeaders(#[source] TransportError),

    #[error("failed to stream body: {0}")]
    Body(#[source] std::io::Error),

    #[error("websocket bridge failed: {0}")]
    Bridge(#[from] BridgeError),

    #[error("origin handler panicked: {0}")]
    Panicked(String),

    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Malformed(_) => "malformed",
            StreamError::Origin(_) => "origin",
            StreamError::WriteHeaders(_) => "write_headers",
            StreamError::Body(_) => "body",
            StreamError::Bridge(_) => "bridge",
            StreamError::Panicked(_) => "panic",
            StreamError::Cancelled => "cancelled",
        }
    }
}
