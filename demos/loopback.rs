//! Loopback demo: an in-process edge drives a connection to a local axum origin.
//!
//! Run with `cargo run --example loopback [config.toml]`.

use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use tunnel_connection::config::{load_config, TunnelConfig};
use tunnel_connection::mux::memory;
use tunnel_connection::mux::Header;
use tunnel_connection::observability::logging::init_logging;
use tunnel_connection::{Connection, HttpOrigin};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => TunnelConfig::default(),
    };
    init_logging(&config.observability.log_level);

    let app = Router::new().route("/", get(|| async { "Hello from the origin" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    config.origin.url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let origin = HttpOrigin::new(&config.origin)?;
    let (transport, edge) = memory::pair();
    let edge = Arc::new(edge);
    let connection = Arc::new(Connection::new(config.connection.clone(), transport, Arc::new(origin))?);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let edge = edge.clone();
        let cancel = shutdown.clone();
        async move { edge.serve(cancel).await }
    });
    let serving = tokio::spawn({
        let connection = connection.clone();
        let shutdown = shutdown.clone();
        async move { connection.serve(shutdown).await }
    });

    let mut stream = edge
        .open_stream(vec![
            Header::new(":method", "GET"),
            Header::new(":authority", "localhost"),
            Header::new(":path", "/"),
        ])
        .await?;
    let headers = stream.response_headers().await?.to_vec();
    let mut body = String::new();
    stream.read_to_string(&mut body).await?;

    for header in &headers {
        println!("{}: {}", header.name, header.value);
    }
    println!();
    println!("{}", body);

    shutdown.cancel();
    let reason = serving.await?;
    println!("connection ended: {}", reason);
    Ok(())
}
