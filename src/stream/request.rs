//! Request translation: stream headers → origin request.
//!
//! # Responsibilities
//! - Extract routing pseudo-headers (`:method`, `:path`, `:scheme`, `:authority`)
//! - Detect WebSocket upgrades from the `connection`/`upgrade` pair
//! - Forward every other header untouched, in order
//!
//! # Design Decisions
//! - Headers stay an ordered list; duplicates and ordering reach the origin as sent
//! - Every `:`-prefixed name is reserved and never forwarded
//! - A missing `:path` is the only way a request can lack routing information

use hyper::Method;
use thiserror::Error;

use crate::mux::{find_header, Header};

const PATH: &str = ":path";
const METHOD: &str = ":method";
const AUTHORITY: &str = ":authority";
const CONNECTION: &str = "connection";
const UPGRADE: &str = "upgrade";

/// Reasons a stream cannot be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRequest {
    #[error("missing :path pseudo-header")]
    MissingPath,

    #[error("invalid :method {0:?}")]
    InvalidMethod(String),
}

/// An origin request reconstructed from stream headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub method: Method,
    /// Path and query, always starting with `/`.
    pub path: String,
    /// Value of `:authority`, forwarded as the `host` header when present.
    pub host: Option<String>,
    /// Headers forwarded to the origin.
    pub headers: Vec<Header>,
    pub is_websocket: bool,
}

impl StreamRequest {
    /// Whether the edge announced a request body.
    ///
    /// Streams without `content-length` or `transfer-encoding` are sent to
    /// the origin with an empty body.
    pub fn has_body(&self) -> bool {
        if find_header(&self.headers, "transfer-encoding").is_some() {
            return true;
        }
        find_header(&self.headers, "content-length")
            .and_then(|len| len.trim().parse::<u64>().ok())
            .is_some_and(|len| len > 0)
    }
}

/// Build a [`StreamRequest`] from the headers a stream was opened with.
pub fn build_request(headers: &[Header]) -> Result<StreamRequest, MalformedRequest> {
    let path = match find_header(headers, PATH) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => return Err(MalformedRequest::MissingPath),
    };

    let method = match find_header(headers, METHOD) {
        Some(method) => Method::from_bytes(method.as_bytes())
            .map_err(|_| MalformedRequest::InvalidMethod(method.to_string()))?,
        None => Method::GET,
    };

    let host = find_header(headers, AUTHORITY).map(str::to_string);
    let is_websocket = is_websocket_upgrade(headers);

    let headers = headers
        .iter()
        .filter(|h| !is_reserved(&h.name))
        .cloned()
        .collect();

    Ok(StreamRequest {
        method,
        path,
        host,
        headers,
        is_websocket,
    })
}

fn is_reserved(name: &str) -> bool {
    name.starts_with(':')
        || name.eq_ignore_ascii_case(CONNECTION)
        || name.eq_ignore_ascii_case(UPGRADE)
}

/// `connection` must list the `upgrade` token and `upgrade` must name `websocket`.
fn is_websocket_upgrade(headers: &[Header]) -> bool {
    let connection_upgrade = headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case(CONNECTION))
        .flat_map(|h| h.value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(UPGRADE));

    let upgrade_websocket = headers
        .iter()
        .filter(|h| h.name.eq_ignore_ascii_case(UPGRADE))
        .any(|h| h.value.trim().eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}
