//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tunnel_connection::config::{ConnectionConfig, HeartbeatConfig, OriginConfig};
use tunnel_connection::mux::memory::{self, MemoryEdge, MemoryTransport};
use tunnel_connection::mux::Header;
use tunnel_connection::{Connection, ConnectionError, HttpOrigin};

/// Size of the `/large_file` body.
pub const LARGE_FILE_SIZE: usize = 1024 * 1024;

/// Start the test origin on an ephemeral port.
///
/// Routes: `/ok`, `/large_file`, `/400`, `/500`, `/echo` (POST), `/id/{id}`
/// and `/ws` (WebSocket echo).
pub async fn start_origin() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { "OK" }))
        .route("/large_file", get(|| async { vec![b'x'; LARGE_FILE_SIZE] }))
        .route("/400", get(|| async { (StatusCode::BAD_REQUEST, "Bad Request") }))
        .route("/500", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error") }))
        .route("/echo", post(|body: Bytes| async move { body }))
        .route("/id/{id}", get(|Path(id): Path<String>| async move { id }))
        .route("/ws", get(ws_echo));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn ws_echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(echo_messages)
}

async fn echo_messages(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Connection settings with short heartbeat and drain timings.
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat: HeartbeatConfig {
            interval_ms: 50,
            max_heartbeats: 3,
        },
        drain_grace_period_ms: 500,
        ..ConnectionConfig::default()
    }
}

/// Request headers for a plain GET.
pub fn get_headers(path: &str) -> Vec<Header> {
    vec![
        Header::new(":method", "GET"),
        Header::new(":scheme", "http"),
        Header::new(":authority", "localhost"),
        Header::new(":path", path),
    ]
}

/// Request headers for a WebSocket upgrade.
pub fn websocket_headers(path: &str) -> Vec<Header> {
    let mut headers = get_headers(path);
    headers.push(Header::new("connection", "Upgrade"));
    headers.push(Header::new("upgrade", "websocket"));
    headers
}

/// A live connection over the in-memory transport.
pub struct TestTunnel {
    pub edge: Arc<MemoryEdge>,
    pub connection: Arc<Connection<MemoryTransport, HttpOrigin>>,
    pub shutdown: CancellationToken,
    edge_cancel: CancellationToken,
    task: JoinHandle<ConnectionError>,
}

impl TestTunnel {
    /// Serve a connection to `origin`, with the edge answering heartbeats.
    pub fn start(origin: SocketAddr, config: ConnectionConfig) -> Self {
        let origin_config = OriginConfig {
            url: format!("http://{}", origin),
            ..OriginConfig::default()
        };
        let origin = HttpOrigin::new(&origin_config).unwrap();

        let (transport, edge) = memory::pair();
        let edge = Arc::new(edge);
        let connection = Arc::new(Connection::new(config, transport, Arc::new(origin)).unwrap());

        let edge_cancel = CancellationToken::new();
        tokio::spawn({
            let edge = edge.clone();
            let cancel = edge_cancel.clone();
            async move { edge.serve(cancel).await }
        });

        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let connection = connection.clone();
            let shutdown = shutdown.clone();
            async move { connection.serve(shutdown).await }
        });

        Self {
            edge,
            connection,
            shutdown,
            edge_cancel,
            task,
        }
    }

    /// Wait for the connection to end on its own.
    pub async fn join(self) -> ConnectionError {
        let reason = self.task.await.unwrap();
        self.edge_cancel.cancel();
        reason
    }

    /// Cancel the connection and return why it ended.
    pub async fn stop(self) -> ConnectionError {
        self.shutdown.cancel();
        self.join().await
    }
}
