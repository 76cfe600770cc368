//! WebSocket bridging between a stream and the origin.
//!
//! # Responsibilities
//! - Copy bytes edge → origin and origin → edge once the upgrade succeeded
//! - Tear both directions down as soon as either one ends
//!
//! # Data Flow
//! ```text
//! Edge ←──── stream reader/writer ────→ bridge ←──── upgraded origin socket ────→ Origin
//! ```
//!
//! # Design Decisions
//! - Byte-level forwarding; frames are never parsed or buffered
//! - Half-close is not preserved: the first direction to finish closes the bridge
//! - Cancellation ends the bridge cleanly so no copy loop outlives its connection

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Direction of a bridge copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    EdgeToOrigin,
    OriginToEdge,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::EdgeToOrigin => f.write_str("edge->origin"),
            Direction::OriginToEdge => f.write_str("origin->edge"),
        }
    }
}

/// A copy loop failed.
#[derive(Debug, Error)]
#[error("{direction} copy failed: {source}")]
pub struct BridgeError {
    pub direction: Direction,
    #[source]
    pub source: io::Error,
}

/// Pipe bytes between the edge and an upgraded origin connection.
///
/// Returns when either direction reaches end of stream or fails, or when
/// `cancel` fires. Only a failing copy loop produces an error.
pub async fn bridge<R, W, O>(
    mut edge_reader: R,
    mut edge_writer: W,
    origin: O,
    cancel: &CancellationToken,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    O: AsyncRead + AsyncWrite + Unpin,
{
    let (mut origin_reader, mut origin_writer) = tokio::io::split(origin);

    let result = tokio::select! {
        copied = tokio::io::copy(&mut edge_reader, &mut origin_writer) => {
            finish(Direction::EdgeToOrigin, copied)
        }
        copied = tokio::io::copy(&mut origin_reader, &mut edge_writer) => {
            finish(Direction::OriginToEdge, copied)
        }
        _ = cancel.cancelled() => {
            tracing::debug!("WebSocket bridge cancelled");
            Ok(())
        }
    };

    // Best effort: the peer may already be gone.
    let _ = origin_writer.shutdown().await;
    let _ = edge_writer.shutdown().await;

    result
}

fn finish(direction: Direction, copied: io::Result<u64>) -> Result<(), BridgeError> {
    match copied {
        Ok(bytes) => {
            tracing::debug!(%direction, bytes, "WebSocket bridge direction closed");
            Ok(())
        }
        Err(source) => Err(BridgeError { direction, source }),
    }
}
