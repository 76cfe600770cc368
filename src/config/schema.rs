//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a tunnel
//! connection. All types derive Serde traits for deserialization from config
//! files, and every field has a documented default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a tunnel connection.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Per-connection settings (heartbeat, compression, draining).
    pub connection: ConnectionConfig,

    /// Local origin service settings.
    pub origin: OriginConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Settings for one multiplexed transport connection.
///
/// Read-only once a [`Connection`](crate::connection::Connection) is built.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Index of this transport among the connections of one tunnel.
    pub conn_index: u8,

    /// Liveness probing.
    pub heartbeat: HeartbeatConfig,

    /// Compression level negotiated with the edge (passed through).
    pub compression: CompressionSetting,

    /// How often connection-level gauges are refreshed, in milliseconds.
    pub metrics_update_freq_ms: u64,

    /// How long in-flight streams may keep running once draining starts,
    /// in milliseconds.
    pub drain_grace_period_ms: u64,
}

impl ConnectionConfig {
    /// Metrics refresh period.
    pub fn metrics_update_freq(&self) -> Duration {
        Duration::from_millis(self.metrics_update_freq_ms)
    }

    /// Drain grace period.
    pub fn drain_grace_period(&self) -> Duration {
        Duration::from_millis(self.drain_grace_period_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            conn_index: 0,
            heartbeat: HeartbeatConfig::default(),
            compression: CompressionSetting::None,
            metrics_update_freq_ms: 5_000,
            drain_grace_period_ms: 10_000,
        }
    }
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between probes in milliseconds.
    pub interval_ms: u64,

    /// Consecutive unanswered probes before the connection is declared dead.
    pub max_heartbeats: u64,
}

impl HeartbeatConfig {
    /// Probe interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_heartbeats: 5,
        }
    }
}

/// Compression level for the transport.
///
/// Only carried and reported; no codec lives in this crate.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionSetting {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl CompressionSetting {
    /// Numeric level as advertised on the wire.
    pub fn level(&self) -> u8 {
        match self {
            CompressionSetting::None => 0,
            CompressionSetting::Low => 1,
            CompressionSetting::Medium => 2,
            CompressionSetting::High => 3,
        }
    }
}

impl std::fmt::Display for CompressionSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompressionSetting::None => "none",
            CompressionSetting::Low => "low",
            CompressionSetting::Medium => "medium",
            CompressionSetting::High => "high",
        };
        f.write_str(name)
    }
}

/// Origin service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL of the local origin (e.g., "http://127.0.0.1:8080").
    pub url: String,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Time allowed for the origin to produce response headers, in milliseconds.
    pub request_timeout_ms: u64,
}

impl OriginConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
