//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection supervisor, heartbeat monitor and stream tasks produce:
//!     → logging.rs (structured tracing events, per-stream spans)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Consumers:
//!     → Whatever subscriber / recorder the embedding process installs
//! ```
//!
//! # Design Decisions
//! - Every event carries `conn_index`; stream events also carry `stream_id`
//! - No exporter lives here; without a recorder, metrics are no-ops

pub mod logging;
pub mod metrics;
