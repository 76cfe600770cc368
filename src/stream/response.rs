//! Response translation: origin answer → stream headers and body.
//!
//! # Responsibilities
//! - Tag every response with its provenance (origin or this layer)
//! - Write `:status`, then the provenance header, then the remaining headers
//! - Stream the body after the header block and end the stream
//!
//! # Design Decisions
//! - Provenance and status travel in the same header block, before any body byte
//! - Locally synthesized responses never carry a body
//! - Write failures are returned to the caller, never panicked on
//! - Origin headers cannot override the status or provenance, and hop-by-hop
//!   headers stop here (a 101 keeps `connection` and `upgrade`)

use hyper::StatusCode;
use tokio::io::AsyncWriteExt;

use super::StreamError;
use crate::mux::{Header, ResponseWriter};
use crate::origin::{BodyReader, OriginResponse};

/// Header carrying the provenance tag.
pub const RESPONSE_META_HEADER: &str = "cf-cloudflared-response-meta";

const STATUS: &str = ":status";

/// Connection-scoped headers that never cross the tunnel.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Who produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// The origin service answered.
    Origin,
    /// This layer synthesized the answer.
    Cloudflared,
}

impl Provenance {
    /// Wire value of the provenance header.
    pub fn header_value(&self) -> &'static str {
        match self {
            Provenance::Origin => r#"{"src":"origin"}"#,
            Provenance::Cloudflared => r#"{"src":"cloudflared"}"#,
        }
    }

    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Origin => "origin",
            Provenance::Cloudflared => "cloudflared",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response ready to be written to a stream.
pub struct StreamResponse {
    pub status: StatusCode,
    pub provenance: Provenance,
    pub headers: Vec<Header>,
    pub body: Option<BodyReader>,
}

impl StreamResponse {
    /// A bodiless response produced by this layer.
    pub fn synthesized(status: StatusCode) -> Self {
        Self {
            status,
            provenance: Provenance::Cloudflared,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Pass an origin answer through verbatim.
    pub fn from_origin(response: OriginResponse) -> Self {
        Self {
            status: response.status,
            provenance: Provenance::Origin,
            headers: response.headers,
            body: Some(response.body),
        }
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("provenance", &self.provenance)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Assemble the header block for a response.
pub fn response_headers(status: StatusCode, provenance: Provenance, headers: Vec<Header>) -> Vec<Header> {
    let mut block = Vec::with_capacity(headers.len() + 2);
    block.push(Header::new(STATUS, status.as_str()));
    block.push(Header::new(RESPONSE_META_HEADER, provenance.header_value()));
    block.extend(headers.into_iter().filter(|h| forwardable(&h.name, status)));
    block
}

fn forwardable(name: &str, status: StatusCode) -> bool {
    if name.starts_with(':') || name.eq_ignore_ascii_case(RESPONSE_META_HEADER) {
        return false;
    }
    if status == StatusCode::SWITCHING_PROTOCOLS
        && (name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("upgrade"))
    {
        return true;
    }
    !HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Write only the header block, leaving the stream open (used for upgrades).
pub async fn write_head<W: ResponseWriter + ?Sized>(
    writer: &mut W,
    status: StatusCode,
    provenance: Provenance,
    headers: Vec<Header>,
) -> Result<(), StreamError> {
    writer
        .write_headers(response_headers(status, provenance, headers))
        .await
        .map_err(StreamError::WriteHeaders)
}

/// Write a full response and end the stream.
pub async fn write_response<W: ResponseWriter + ?Sized>(
    writer: &mut W,
    response: StreamResponse,
) -> Result<(), StreamError> {
    write_head(writer, response.status, response.provenance, response.headers).await?;

    if let Some(mut body) = response.body {
        tokio::io::copy(&mut body, writer)
            .await
            .map_err(StreamError::Body)?;
    }
    writer.shutdown().await.map_err(StreamError::Body)
}
