//! Transport liveness monitoring.
//!
//! # Responsibilities
//! - Probe the transport every heartbeat interval
//! - Count consecutive unanswered probes
//! - Report a timeout once the count reaches `max_heartbeats`
//!
//! # State Transitions
//! ```text
//! missed = 0 ──probe unanswered──→ missed + 1 ──reaches max──→ TimedOut
//!     ▲                                │
//!     └──────────probe acked───────────┘
//! ```
//!
//! # Design Decisions
//! - Each probe waits at most one interval for its acknowledgement
//! - Runs on its own schedule, independent of stream traffic
//! - Any acknowledged probe resets the count to zero

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HeartbeatConfig;
use crate::mux::MuxTransport;
use crate::observability::metrics;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The edge stopped answering probes.
    TimedOut { missed: u64 },
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Consecutive missed probe counter.
#[derive(Debug, Clone)]
pub struct MissedProbes {
    missed: u64,
    max: u64,
}

impl MissedProbes {
    pub fn new(max: u64) -> Self {
        Self { missed: 0, max }
    }

    /// Record one probe result. Returns `true` once the threshold is reached.
    ///
    /// An acknowledged probe never breaches, whatever the threshold.
    pub fn record(&mut self, acknowledged: bool) -> bool {
        if acknowledged {
            self.missed = 0;
            return false;
        }
        self.missed += 1;
        self.missed >= self.max
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }
}

/// Periodically probes one transport.
pub struct HeartbeatMonitor<T> {
    transport: Arc<T>,
    config: HeartbeatConfig,
    conn_index: u8,
}

impl<T: MuxTransport> HeartbeatMonitor<T> {
    pub fn new(transport: Arc<T>, config: HeartbeatConfig, conn_index: u8) -> Self {
        Self {
            transport,
            config,
            conn_index,
        }
    }

    /// Probe until the edge stops answering or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> HeartbeatResult {
        // `time::interval` rejects a zero period.
        let interval = self.config.interval().max(Duration::from_millis(1));
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed = MissedProbes::new(self.config.max_heartbeats);

        tracing::debug!(
            interval_ms = self.config.interval_ms,
            max_heartbeats = self.config.max_heartbeats,
            "Heartbeat monitor starting"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return HeartbeatResult::Cancelled,
                _ = ticker.tick() => {}
            }

            let acknowledged = tokio::select! {
                _ = cancel.cancelled() => return HeartbeatResult::Cancelled,
                probe = time::timeout(interval, self.transport.probe()) => match probe {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "Heartbeat probe failed");
                        false
                    }
                    Err(_) => {
                        tracing::debug!("Heartbeat probe unacknowledged within interval");
                        false
                    }
                },
            };

            let breached = missed.record(acknowledged);
            metrics::record_heartbeat_missed(self.conn_index, missed.missed());

            if !acknowledged {
                tracing::warn!(
                    missed = missed.missed(),
                    max_heartbeats = self.config.max_heartbeats,
                    "Missed heartbeat"
                );
            }
            if breached {
                return HeartbeatResult::TimedOut {
                    missed: missed.missed(),
                };
            }
        }
    }
}
