//! Origin service capability.
//!
//! # Data Flow
//! ```text
//! StreamRequest (+ optional body reader)
//!     → Origin::round_trip      → OriginResponse (status, headers, body reader)
//!     → Origin::open_websocket  → Upgraded duplex | Rejected response
//! ```
//!
//! # Design Decisions
//! - Any status the origin produces is a success here, including 4xx/5xx
//! - Only failures to get an answer at all surface as `OriginError`
//! - `http.rs` implements the capability with the hyper client

pub mod http;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use hyper::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::mux::Header;
use crate::stream::request::StreamRequest;

pub use self::http::HttpOrigin;

/// Streaming body handed between the transport and the origin.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Failures to obtain any answer from the origin.
#[derive(Debug, Error)]
pub enum OriginError {
    /// The request could not be expressed to the origin (bad header, bad URI).
    #[error("invalid origin request: {0}")]
    InvalidRequest(String),

    /// Connecting to the origin failed (refused, unreachable, DNS).
    #[error("origin connect failed: {0}")]
    Connect(String),

    /// The origin did not answer in time.
    #[error("origin timed out after {0:?}")]
    Timeout(Duration),

    /// The origin connection broke or spoke invalid HTTP.
    #[error("origin protocol error: {0}")]
    Protocol(String),

    /// The origin accepted the upgrade but the connection could not be taken over.
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailed(String),
}

/// An answer produced by the origin.
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: Vec<Header>,
    pub body: BodyReader,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A bidirectional byte channel to the origin after an upgrade.
pub trait OriginDuplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> OriginDuplex for T {}

/// Result of asking the origin to upgrade to WebSocket.
pub enum WebSocketOpen {
    /// The origin answered 101; `io` carries the raw WebSocket bytes.
    Upgraded {
        headers: Vec<Header>,
        io: Box<dyn OriginDuplex>,
    },
    /// The origin answered with something other than 101.
    Rejected(OriginResponse),
}

/// The local service requests are forwarded to.
#[async_trait]
pub trait Origin: Send + Sync + 'static {
    /// Perform one HTTP exchange.
    async fn round_trip(
        &self,
        request: &StreamRequest,
        body: Option<BodyReader>,
    ) -> Result<OriginResponse, OriginError>;

    /// Ask the origin to upgrade to WebSocket at the request's path.
    async fn open_websocket(&self, request: &StreamRequest) -> Result<WebSocketOpen, OriginError>;
}
