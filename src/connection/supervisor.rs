//! Connection supervision.
//!
//! # Responsibilities
//! - Run the transport's accept loop and spawn one task per stream
//! - Run the heartbeat monitor alongside the accept loop
//! - Drain and close the connection on cancellation, transport failure or
//!   heartbeat timeout
//!
//! # State Transitions
//! ```text
//! Initializing ──serve()──→ Serving ──cancel | accept error | heartbeat timeout──→ Draining ──→ Closed
//! ```
//!
//! # Drain Policy
//! 1. Stop accepting streams and stop probing
//! 2. Cancel in-flight streams so every one of them writes its final answer
//! 3. Wait for those answers, then abort whatever is left
//! 4. Close the transport and enter `Closed`
//!
//! Step 3 waits up to `drain_grace_period` after an external cancellation.
//! After a heartbeat timeout or transport failure the edge is gone, so the
//! wait is capped at one heartbeat interval.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::heartbeat::{HeartbeatMonitor, HeartbeatResult};
use crate::config::{validate_connection, ConfigError, ConnectionConfig};
use crate::mux::{MuxTransport, MuxedStream, TransportError};
use crate::observability::metrics;
use crate::origin::Origin;
use crate::stream::{serve_stream, StreamOutcome};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initializing,
    Serving,
    Draining,
    Closed,
}

/// Why a connection stopped serving.
///
/// [`Connection::serve`] always ends with one of these; a live connection
/// has no successful outcome.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The shutdown token was cancelled.
    #[error("connection cancelled")]
    Cancelled,

    /// The transport's accept loop failed.
    #[error("transport failed: {0}")]
    TransportFailed(#[source] TransportError),

    /// Too many consecutive heartbeats went unanswered.
    #[error("heartbeat timeout after {missed} missed probes")]
    HeartbeatTimeout { missed: u64 },

    /// `serve` was called on a connection that already ran.
    #[error("connection already served")]
    AlreadyServed,
}

impl ConnectionError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::Cancelled => "cancelled",
            ConnectionError::TransportFailed(_) => "transport_failed",
            ConnectionError::HeartbeatTimeout { .. } => "heartbeat_timeout",
            ConnectionError::AlreadyServed => "already_served",
        }
    }
}

/// One multiplexed transport connection to the edge.
pub struct Connection<T, O: ?Sized> {
    config: ConnectionConfig,
    transport: Arc<T>,
    origin: Arc<O>,
    state: watch::Sender<ConnectionState>,
}

impl<T, O> Connection<T, O>
where
    T: MuxTransport,
    O: Origin + ?Sized,
{
    /// Wrap an established transport. The handshake is already done.
    ///
    /// Fails if `config` has a zero heartbeat interval, heartbeat budget or
    /// metrics period.
    pub fn new(config: ConnectionConfig, transport: T, origin: Arc<O>) -> Result<Self, ConfigError> {
        validate_connection(&config).map_err(ConfigError::Validation)?;

        let (state, _) = watch::channel(ConnectionState::Initializing);
        Ok(Self {
            config,
            transport: Arc::new(transport),
            origin,
            state,
        })
    }

    pub fn conn_index(&self) -> u8 {
        self.config.conn_index
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Serve streams until `shutdown` fires or the connection fails.
    ///
    /// Returns the reason the connection ended once it is `Closed`.
    pub async fn serve(&self, shutdown: CancellationToken) -> ConnectionError {
        let started = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Initializing {
                *state = ConnectionState::Serving;
                true
            } else {
                false
            }
        });
        if !started {
            return ConnectionError::AlreadyServed;
        }

        let conn_index = self.config.conn_index;
        tracing::info!(
            conn_index,
            compression = %self.config.compression,
            heartbeat_interval_ms = self.config.heartbeat.interval_ms,
            "Connection serving"
        );

        let streams_token = shutdown.child_token();
        let heartbeat_token = streams_token.child_token();

        let monitor = HeartbeatMonitor::new(self.transport.clone(), self.config.heartbeat, conn_index);
        let heartbeat = monitor.run(heartbeat_token.clone());
        tokio::pin!(heartbeat);

        let mut streams: JoinSet<StreamOutcome> = JoinSet::new();
        let mut metrics_tick = time::interval(self.config.metrics_update_freq());
        metrics_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break ConnectionError::Cancelled,

                result = &mut heartbeat => match result {
                    HeartbeatResult::TimedOut { missed } => {
                        tracing::error!(conn_index, missed, "Heartbeat timeout, draining connection");
                        break ConnectionError::HeartbeatTimeout { missed };
                    }
                    HeartbeatResult::Cancelled => break ConnectionError::Cancelled,
                },

                accepted = self.transport.accept() => match accepted {
                    Ok(stream) => self.spawn_stream(&mut streams, stream, &streams_token),
                    Err(e) => {
                        tracing::error!(conn_index, error = %e, "Transport accept failed, draining connection");
                        break ConnectionError::TransportFailed(e);
                    }
                },

                Some(joined) = streams.join_next(), if !streams.is_empty() => self.reap(joined),

                _ = metrics_tick.tick() => metrics::record_active_streams(conn_index, streams.len()),
            }
        };

        heartbeat_token.cancel();
        self.drain(reason, streams, streams_token).await
    }

    fn spawn_stream(
        &self,
        streams: &mut JoinSet<StreamOutcome>,
        stream: T::Stream,
        cancel: &CancellationToken,
    ) {
        let span = tracing::info_span!(
            "stream",
            conn_index = self.config.conn_index,
            stream_id = stream.stream_id()
        );
        let origin = self.origin.clone();
        let cancel = cancel.clone();

        streams.spawn(
            async move { serve_stream(stream, origin.as_ref(), &cancel).await }.instrument(span),
        );
    }

    /// Record a finished stream task.
    fn reap(&self, joined: Result<StreamOutcome, JoinError>) {
        let conn_index = self.config.conn_index;
        match joined {
            Ok(outcome) => {
                metrics::record_stream(conn_index, &outcome);
                match &outcome.error {
                    None => tracing::debug!(
                        conn_index,
                        stream_id = outcome.stream_id,
                        kind = outcome.kind.as_str(),
                        status = outcome.status.as_u16(),
                        provenance = %outcome.provenance,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Stream completed"
                    ),
                    Some(error) => tracing::info!(
                        conn_index,
                        stream_id = outcome.stream_id,
                        kind = outcome.kind.as_str(),
                        status = outcome.status.as_u16(),
                        provenance = %outcome.provenance,
                        error = %error,
                        "Stream ended with error"
                    ),
                }
            }
            Err(e) if e.is_panic() => {
                tracing::error!(conn_index, error = %e, "Stream task panicked");
                metrics::record_stream_panic(conn_index);
            }
            Err(e) => tracing::debug!(conn_index, error = %e, "Stream task aborted"),
        }
    }

    async fn drain(
        &self,
        reason: ConnectionError,
        mut streams: JoinSet<StreamOutcome>,
        streams_token: CancellationToken,
    ) -> ConnectionError {
        let conn_index = self.config.conn_index;
        self.state.send_replace(ConnectionState::Draining);
        tracing::info!(
            conn_index,
            reason = reason.reason(),
            in_flight = streams.len(),
            "Connection draining"
        );

        streams_token.cancel();

        let deadline = self.drain_deadline(&reason);
        if time::timeout(deadline, self.join_all(&mut streams)).await.is_err() {
            tracing::warn!(
                conn_index,
                remaining = streams.len(),
                deadline_ms = deadline.as_millis() as u64,
                "Drain deadline elapsed, aborting streams"
            );
            streams.shutdown().await;
        }
        metrics::record_active_streams(conn_index, 0);

        self.transport.close().await;
        self.state.send_replace(ConnectionState::Closed);
        metrics::record_connection_terminated(conn_index, reason.reason());
        tracing::info!(conn_index, reason = reason.reason(), "Connection closed");

        reason
    }

    /// How long cancelled streams get to deliver their answers.
    fn drain_deadline(&self, reason: &ConnectionError) -> Duration {
        let grace = self.config.drain_grace_period();
        match reason {
            ConnectionError::HeartbeatTimeout { .. } | ConnectionError::TransportFailed(_) => {
                grace.min(self.config.heartbeat.interval())
            }
            _ => grace,
        }
    }

    async fn join_all(&self, streams: &mut JoinSet<StreamOutcome>) {
        while let Some(joined) = streams.join_next().await {
            self.reap(joined);
        }
    }
}
