//! In-process multiplexed transport.
//!
//! # Responsibilities
//! - Provide a [`MuxTransport`] without any wire framing
//! - Expose the edge half so callers can open streams and answer probes
//! - Model transport closure and an edge that stops answering heartbeats
//!
//! # Data Flow
//! ```text
//! MemoryEdge::open_stream(headers)
//!     → mpsc → MemoryTransport::accept() → MemoryStream
//! MemoryResponder::write_headers(..) → oneshot → EdgeStream::response_headers()
//! body bytes: EdgeStream ⇄ tokio::io::duplex ⇄ MemoryStream
//! MemoryTransport::probe() → mpsc → MemoryEdge::serve() → oneshot ack
//! ```

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use super::{find_header, Header, MuxTransport, MuxedStream, ResponseWriter, TransportError};

/// Bytes buffered per direction of a stream.
const STREAM_BUFFER: usize = 64 * 1024;

/// Streams the edge may open before the client half accepts them.
const ACCEPT_BACKLOG: usize = 64;

type ProbeAck = oneshot::Sender<()>;

/// Create a connected transport pair.
pub fn pair() -> (MemoryTransport, MemoryEdge) {
    let (stream_tx, stream_rx) = mpsc::channel(ACCEPT_BACKLOG);
    let (probe_tx, probe_rx) = mpsc::channel(16);
    let closed = CancellationToken::new();

    let transport = MemoryTransport {
        incoming: Mutex::new(stream_rx),
        probes: probe_tx,
        closed: closed.clone(),
    };
    let edge = MemoryEdge {
        streams: stream_tx,
        probes: Mutex::new(probe_rx),
        responsive: AtomicBool::new(true),
        next_id: AtomicU32::new(1),
        closed,
    };
    (transport, edge)
}

/// Client half of the in-process transport.
#[derive(Debug)]
pub struct MemoryTransport {
    incoming: Mutex<mpsc::Receiver<MemoryStream>>,
    probes: mpsc::Sender<ProbeAck>,
    closed: CancellationToken,
}

#[async_trait]
impl MuxTransport for MemoryTransport {
    type Stream = MemoryStream;

    async fn accept(&self) -> Result<MemoryStream, TransportError> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            stream = incoming.recv() => stream.ok_or(TransportError::Closed),
        }
    }

    async fn probe(&self) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            result = async {
                self.probes.send(ack_tx).await.map_err(|_| TransportError::Closed)?;
                ack_rx
                    .await
                    .map_err(|_| TransportError::ProbeFailed("edge dropped probe".to_string()))
            } => result,
        }
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::debug!("Closing in-memory transport");
        }
        self.closed.cancel();
    }
}

/// Edge half of the in-process transport.
#[derive(Debug)]
pub struct MemoryEdge {
    streams: mpsc::Sender<MemoryStream>,
    probes: Mutex<mpsc::Receiver<ProbeAck>>,
    responsive: AtomicBool,
    next_id: AtomicU32,
    closed: CancellationToken,
}

impl MemoryEdge {
    /// Open a stream toward the client half.
    ///
    /// Returns as soon as the stream is queued; await
    /// [`EdgeStream::response_headers`] for the answer.
    pub async fn open_stream(&self, headers: Vec<Header>) -> Result<EdgeStream, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        // Edge-initiated streams use odd ids.
        let id = self.next_id.fetch_add(2, Ordering::Relaxed);
        let (edge_io, client_io) = tokio::io::duplex(STREAM_BUFFER);
        let (response_tx, response_rx) = oneshot::channel();

        let stream = MemoryStream {
            id,
            headers,
            io: client_io,
            response: Some(response_tx),
        };
        self.streams.send(stream).await.map_err(|_| TransportError::Closed)?;

        Ok(EdgeStream {
            id,
            io: edge_io,
            response: Some(response_rx),
            headers: Vec::new(),
        })
    }

    /// Answer liveness probes until `cancel` fires or the transport closes.
    pub async fn serve(&self, cancel: CancellationToken) {
        let mut probes = self.probes.lock().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.closed.cancelled() => break,
                probe = probes.recv() => match probe {
                    Some(ack) => {
                        if self.responsive.load(Ordering::Relaxed) {
                            let _ = ack.send(());
                        }
                    }
                    None => break,
                },
            }
        }
    }

    /// Make [`serve`](Self::serve) answer (or silently drop) probes.
    pub fn set_responsive(&self, responsive: bool) {
        self.responsive.store(responsive, Ordering::Relaxed);
    }

    /// Drop the transport from the edge side.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// True once either side has closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// A stream as seen by the client half.
#[derive(Debug)]
pub struct MemoryStream {
    id: u32,
    headers: Vec<Header>,
    io: DuplexStream,
    response: Option<oneshot::Sender<Vec<Header>>>,
}

impl MuxedStream for MemoryStream {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = MemoryResponder;

    fn stream_id(&self) -> u32 {
        self.id
    }

    fn request_headers(&self) -> &[Header] {
        &self.headers
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = tokio::io::split(self.io);
        let responder = MemoryResponder {
            id: self.id,
            io: writer,
            response: self.response,
        };
        (reader, responder)
    }
}

/// Response half of a [`MemoryStream`].
#[derive(Debug)]
pub struct MemoryResponder {
    id: u32,
    io: WriteHalf<DuplexStream>,
    response: Option<oneshot::Sender<Vec<Header>>>,
}

#[async_trait]
impl ResponseWriter for MemoryResponder {
    async fn write_headers(&mut self, headers: Vec<Header>) -> Result<(), TransportError> {
        let response = self
            .response
            .take()
            .ok_or(TransportError::HeadersAlreadySent(self.id))?;
        response
            .send(headers)
            .map_err(|_| TransportError::StreamReset(self.id))
    }
}

impl AsyncWrite for MemoryResponder {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// A stream as seen by the edge half.
///
/// Writing sends the request body; reading yields the response body.
#[derive(Debug)]
pub struct EdgeStream {
    id: u32,
    io: DuplexStream,
    response: Option<oneshot::Receiver<Vec<Header>>>,
    headers: Vec<Header>,
}

impl EdgeStream {
    pub fn stream_id(&self) -> u32 {
        self.id
    }

    /// Wait for the response header block.
    ///
    /// Fails with [`TransportError::StreamReset`] if the client half dropped
    /// the stream without answering.
    pub async fn response_headers(&mut self) -> Result<&[Header], TransportError> {
        if let Some(response) = self.response.take() {
            self.headers = response
                .await
                .map_err(|_| TransportError::StreamReset(self.id))?;
        }
        Ok(&self.headers)
    }

    /// Value of a received response header.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// True if a received response header has exactly this name and value.
    pub fn has_header(&self, name: &str, value: &str) -> bool {
        self.headers
            .iter()
            .any(|h| h.name == name && h.value == value)
    }
}

impl AsyncRead for EdgeStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for EdgeStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
