//! Per-stream dispatch.
//!
//! # Responsibilities
//! - Turn one accepted stream into exactly one terminal response
//! - Choose between the HTTP exchange and the WebSocket bridge
//! - Map failures to locally synthesized responses (400, 502)
//!
//! # Data Flow
//! ```text
//! MuxedStream
//!     → request.rs (build_request)      ──malformed──→ 400 cloudflared
//!     → websocket? ── open_websocket ──101──→ write head (origin) → bridge
//!                                     ──err──→ 502 cloudflared
//!     → round_trip ──ok──→ status/headers/body (origin)
//!                  ──err─→ 502 cloudflared
//! ```
//!
//! # Design Decisions
//! - Errors never leave the stream: they become a response plus a recorded outcome
//! - Origin 4xx/5xx are answers, not failures, and pass through untouched
//! - Every await observes the connection's cancellation token
//! - A panicking origin call is answered like a failed one

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use hyper::StatusCode;
use tokio_util::sync::CancellationToken;

use super::request::{build_request, StreamRequest};
use super::response::{write_head, write_response, Provenance, StreamResponse};
use super::websocket::bridge;
use super::StreamError;
use crate::mux::{MuxedStream, ResponseWriter};
use crate::origin::{BodyReader, Origin, OriginError, WebSocketOpen};

/// Kind of exchange a stream turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Http,
    WebSocket,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Http => "http",
            StreamKind::WebSocket => "websocket",
        }
    }
}

/// What happened to one stream.
///
/// `status` and `provenance` describe the response that was sent (or
/// attempted); `error` records any failure along the way.
#[derive(Debug)]
pub struct StreamOutcome {
    pub stream_id: u32,
    pub kind: StreamKind,
    pub status: StatusCode,
    pub provenance: Provenance,
    pub error: Option<StreamError>,
    pub elapsed: Duration,
}

impl StreamOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Serve one stream to completion.
pub async fn serve_stream<S, O>(stream: S, origin: &O, cancel: &CancellationToken) -> StreamOutcome
where
    S: MuxedStream,
    O: Origin + ?Sized,
{
    let started = Instant::now();
    let stream_id = stream.stream_id();
    let request = build_request(stream.request_headers());
    let (reader, mut writer) = stream.split();

    let (kind, status, provenance, error) = match request {
        Err(malformed) => {
            tracing::warn!(error = %malformed, "Rejecting malformed stream");
            let status = StatusCode::BAD_REQUEST;
            let written = write_response(&mut writer, StreamResponse::synthesized(status)).await;
            let error = written.err().unwrap_or(StreamError::Malformed(malformed));
            (StreamKind::Http, status, Provenance::Cloudflared, Some(error))
        }
        Ok(request) if request.is_websocket => {
            let (status, provenance, error) =
                serve_websocket(&request, reader, &mut writer, origin, cancel).await;
            (StreamKind::WebSocket, status, provenance, error)
        }
        Ok(request) => {
            let body: Option<BodyReader> = if request.has_body() {
                Some(Box::pin(reader))
            } else {
                None
            };
            let (status, provenance, error) = serve_http(&request, body, &mut writer, origin, cancel).await;
            (StreamKind::Http, status, provenance, error)
        }
    };

    StreamOutcome {
        stream_id,
        kind,
        status,
        provenance,
        error,
        elapsed: started.elapsed(),
    }
}

type Served = (StatusCode, Provenance, Option<StreamError>);

async fn serve_http<W, O>(
    request: &StreamRequest,
    body: Option<BodyReader>,
    writer: &mut W,
    origin: &O,
    cancel: &CancellationToken,
) -> Served
where
    W: ResponseWriter,
    O: Origin + ?Sized,
{
    tracing::debug!(method = %request.method, path = %request.path, "Proxying stream to origin");

    let answer = tokio::select! {
        answer = guarded(origin.round_trip(request, body)) => answer,
        _ = cancel.cancelled() => {
            return synthesize(writer, StatusCode::BAD_GATEWAY, StreamError::Cancelled).await
        }
    };

    match answer {
        Ok(response) => {
            let status = response.status;
            let written = tokio::select! {
                written = write_response(writer, StreamResponse::from_origin(response)) => written,
                _ = cancel.cancelled() => Err(StreamError::Cancelled),
            };
            (status, Provenance::Origin, written.err())
        }
        Err(e) => {
            tracing::warn!(path = %request.path, error = %e, "Origin request failed");
            synthesize(writer, status_for_stream_error(&e), e).await
        }
    }
}

async fn serve_websocket<R, W, O>(
    request: &StreamRequest,
    reader: R,
    writer: &mut W,
    origin: &O,
    cancel: &CancellationToken,
) -> Served
where
    R: tokio::io::AsyncRead + Unpin,
    W: ResponseWriter,
    O: Origin + ?Sized,
{
    tracing::debug!(path = %request.path, "Opening WebSocket to origin");

    let opened = tokio::select! {
        opened = guarded(origin.open_websocket(request)) => opened,
        _ = cancel.cancelled() => {
            return synthesize(writer, StatusCode::BAD_GATEWAY, StreamError::Cancelled).await
        }
    };

    match opened {
        Ok(WebSocketOpen::Upgraded { headers, io }) => {
            let status = StatusCode::SWITCHING_PROTOCOLS;
            if let Err(e) = write_head(writer, status, Provenance::Origin, headers).await {
                return (status, Provenance::Origin, Some(e));
            }
            let bridged = bridge(reader, writer, io, cancel).await;
            (status, Provenance::Origin, bridged.err().map(StreamError::from))
        }
        Ok(WebSocketOpen::Rejected(response)) => {
            tracing::debug!(status = %response.status, "Origin declined WebSocket upgrade");
            let status = response.status;
            let written = tokio::select! {
                written = write_response(writer, StreamResponse::from_origin(response)) => written,
                _ = cancel.cancelled() => Err(StreamError::Cancelled),
            };
            (status, Provenance::Origin, written.err())
        }
        Err(e) => {
            tracing::warn!(path = %request.path, error = %e, "Origin WebSocket open failed");
            synthesize(writer, status_for_stream_error(&e), e).await
        }
    }
}

/// Run an origin call, turning a panic inside it into a stream error.
async fn guarded<F, T>(call: F) -> Result<T, StreamError>
where
    F: Future<Output = Result<T, OriginError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result.map_err(StreamError::Origin),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "Origin handler panicked");
            Err(StreamError::Panicked(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn status_for_stream_error(error: &StreamError) -> StatusCode {
    match error {
        StreamError::Origin(e) => status_for_origin_error(e),
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Answer with a locally synthesized response, recording `cause`.
async fn synthesize<W: ResponseWriter>(writer: &mut W, status: StatusCode, cause: StreamError) -> Served {
    let written = write_response(writer, StreamResponse::synthesized(status)).await;
    if let Err(write_error) = &written {
        tracing::debug!(%status, error = %write_error, "Could not deliver synthesized response");
    }
    (status, Provenance::Cloudflared, Some(cause))
}

/// Map an origin failure to the status a stream is answered with.
///
/// All layer failures answer 502; timeouts and refusals are not distinguished.
pub fn status_for_origin_error(_error: &OriginError) -> StatusCode {
    StatusCode::BAD_GATEWAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::memory::{self, EdgeStream, MemoryEdge, MemoryTransport};
    use crate::mux::{Header, MuxTransport};
    use crate::origin::{OriginDuplex, OriginResponse};
    use crate::stream::response::RESPONSE_META_HEADER;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Origin double that answers from the request path.
    #[derive(Default)]
    struct ScriptedOrigin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Origin for ScriptedOrigin {
        async fn round_trip(
            &self,
            request: &StreamRequest,
            body: Option<BodyReader>,
        ) -> Result<OriginResponse, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.path.as_str() {
                "/ok" => Ok(text(StatusCode::OK, "OK")),
                "/500" => Ok(text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")),
                "/echo" => {
                    let mut received = Vec::new();
                    if let Some(mut body) = body {
                        body.read_to_end(&mut received)
                            .await
                            .map_err(|e| OriginError::Protocol(e.to_string()))?;
                    }
                    Ok(OriginResponse {
                        status: StatusCode::OK,
                        headers: Vec::new(),
                        body: Box::pin(std::io::Cursor::new(received)),
                    })
                }
                "/hang" => std::future::pending().await,
                "/panic" => panic!("handler bug"),
                _ => Err(OriginError::Connect("connection refused".to_string())),
            }
        }

        async fn open_websocket(&self, request: &StreamRequest) -> Result<WebSocketOpen, OriginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.path.as_str() {
                "/ws" => {
                    // Echo whatever the edge sends.
                    let (ours, mut theirs) = tokio::io::duplex(1024);
                    tokio::spawn(async move {
                        let mut buf = [0u8; 256];
                        loop {
                            match theirs.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if theirs.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                    let io: Box<dyn OriginDuplex> = Box::new(ours);
                    Ok(WebSocketOpen::Upgraded {
                        headers: vec![Header::new("upgrade", "websocket")],
                        io,
                    })
                }
                "/ws-forbidden" => Ok(WebSocketOpen::Rejected(text(StatusCode::FORBIDDEN, "no"))),
                "/ws-panic" => panic!("upgrade bug"),
                _ => Err(OriginError::Connect("connection refused".to_string())),
            }
        }
    }

    fn text(status: StatusCode, body: &'static str) -> OriginResponse {
        OriginResponse {
            status,
            headers: vec![Header::new("content-type", "text/plain")],
            body: Box::pin(body.as_bytes()),
        }
    }

    async fn open(
        edge: &MemoryEdge,
        transport: &MemoryTransport,
        headers: Vec<Header>,
    ) -> (EdgeStream, memory::MemoryStream) {
        let edge_stream = edge.open_stream(headers).await.unwrap();
        let stream = transport.accept().await.unwrap();
        (edge_stream, stream)
    }

    fn path(p: &str) -> Vec<Header> {
        vec![Header::new(":path", p)]
    }

    #[tokio::test]
    async fn origin_answer_passes_through_with_origin_provenance() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let cancel = CancellationToken::new();

        for (endpoint, status, body) in [
            ("/ok", "200", "OK"),
            ("/500", "500", "Internal Server Error"),
        ] {
            let (mut edge_stream, stream) = open(&edge, &transport, path(endpoint)).await;
            let outcome = serve_stream(stream, &origin, &cancel).await;
            assert!(outcome.is_success());
            assert_eq!(outcome.provenance, Provenance::Origin);

            edge_stream.response_headers().await.unwrap();
            assert!(edge_stream.has_header(":status", status));
            assert!(edge_stream.has_header(RESPONSE_META_HEADER, Provenance::Origin.header_value()));
            let mut received = String::new();
            edge_stream.read_to_string(&mut received).await.unwrap();
            assert_eq!(received, body);
        }
    }

    #[tokio::test]
    async fn unreachable_origin_yields_local_502() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) = open(&edge, &transport, path("/error")).await;

        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert_eq!(outcome.status, StatusCode::BAD_GATEWAY);
        assert_eq!(outcome.provenance, Provenance::Cloudflared);
        assert!(matches!(outcome.error, Some(StreamError::Origin(OriginError::Connect(_)))));

        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "502"));
        assert!(edge_stream.has_header(RESPONSE_META_HEADER, Provenance::Cloudflared.header_value()));
    }

    #[tokio::test]
    async fn missing_path_yields_400_without_calling_origin() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) =
            open(&edge, &transport, vec![Header::new(":method", "GET")]).await;

        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert_eq!(outcome.status, StatusCode::BAD_REQUEST);
        assert!(matches!(outcome.error, Some(StreamError::Malformed(_))));
        assert_eq!(origin.calls.load(Ordering::SeqCst), 0);

        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "400"));
        assert!(edge_stream.has_header(RESPONSE_META_HEADER, Provenance::Cloudflared.header_value()));
    }

    #[tokio::test]
    async fn announced_body_is_forwarded() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) = open(
            &edge,
            &transport,
            vec![
                Header::new(":method", "POST"),
                Header::new(":path", "/echo"),
                Header::new("content-length", "5"),
            ],
        )
        .await;

        edge_stream.write_all(b"hello").await.unwrap();
        edge_stream.shutdown().await.unwrap();

        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert!(outcome.is_success());

        edge_stream.response_headers().await.unwrap();
        let mut echoed = Vec::new();
        edge_stream.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"hello");
    }

    #[tokio::test]
    async fn websocket_upgrade_bridges_bytes() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) = open(
            &edge,
            &transport,
            vec![
                Header::new(":path", "/ws"),
                Header::new("connection", "upgrade"),
                Header::new("upgrade", "websocket"),
            ],
        )
        .await;

        let task = tokio::spawn(async move {
            serve_stream(stream, &origin, &CancellationToken::new()).await
        });

        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "101"));
        assert!(edge_stream.has_header(RESPONSE_META_HEADER, Provenance::Origin.header_value()));

        edge_stream.write_all(b"test websocket").await.unwrap();
        let mut echoed = [0u8; 14];
        edge_stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"test websocket");

        edge_stream.shutdown().await.unwrap();
        let outcome = task.await.unwrap();
        assert_eq!(outcome.kind, StreamKind::WebSocket);
        assert_eq!(outcome.status, StatusCode::SWITCHING_PROTOCOLS);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn rejected_upgrade_passes_origin_status_through() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) = open(
            &edge,
            &transport,
            vec![
                Header::new(":path", "/ws-forbidden"),
                Header::new("connection", "Upgrade"),
                Header::new("upgrade", "websocket"),
            ],
        )
        .await;

        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert_eq!(outcome.status, StatusCode::FORBIDDEN);
        assert_eq!(outcome.provenance, Provenance::Origin);

        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "403"));
    }

    #[tokio::test]
    async fn failed_upgrade_is_never_101() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) = open(
            &edge,
            &transport,
            vec![
                Header::new(":path", "/ws-down"),
                Header::new("connection", "upgrade"),
                Header::new("upgrade", "websocket"),
            ],
        )
        .await;

        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert_eq!(outcome.status, StatusCode::BAD_GATEWAY);
        assert_eq!(outcome.provenance, Provenance::Cloudflared);

        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "502"));
    }

    #[tokio::test]
    async fn panicking_origin_yields_local_502() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();

        let (mut edge_stream, stream) = open(&edge, &transport, path("/panic")).await;
        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert_eq!(outcome.status, StatusCode::BAD_GATEWAY);
        assert_eq!(outcome.provenance, Provenance::Cloudflared);
        assert!(matches!(&outcome.error, Some(StreamError::Panicked(msg)) if msg == "handler bug"));

        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "502"));
        assert!(edge_stream.has_header(RESPONSE_META_HEADER, Provenance::Cloudflared.header_value()));

        let (mut edge_stream, stream) = open(
            &edge,
            &transport,
            vec![
                Header::new(":path", "/ws-panic"),
                Header::new("connection", "upgrade"),
                Header::new("upgrade", "websocket"),
            ],
        )
        .await;
        let outcome = serve_stream(stream, &origin, &CancellationToken::new()).await;
        assert_eq!(outcome.kind, StreamKind::WebSocket);
        assert!(matches!(outcome.error, Some(StreamError::Panicked(_))));
        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "502"));
    }

    #[tokio::test]
    async fn cancellation_unblocks_hung_origin() {
        let (transport, edge) = memory::pair();
        let origin = ScriptedOrigin::default();
        let (mut edge_stream, stream) = open(&edge, &transport, path("/hang")).await;
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { serve_stream(stream, &origin, &cancel).await }
        });
        cancel.cancel();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome.error, Some(StreamError::Cancelled)));
        edge_stream.response_headers().await.unwrap();
        assert!(edge_stream.has_header(":status", "502"));
    }

    #[test]
    fn every_origin_failure_maps_to_502() {
        for error in [
            OriginError::Connect("refused".into()),
            OriginError::Timeout(Duration::from_secs(1)),
            OriginError::Protocol("bad".into()),
        ] {
            assert_eq!(status_for_origin_error(&error), StatusCode::BAD_GATEWAY);
        }
    }
}
