//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, thresholds > 0)
//! - Check the origin URL is usable by the HTTP origin client (plain `http`)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::{ConnectionConfig, TunnelConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("connection.heartbeat.interval_ms must be greater than zero")]
    ZeroHeartbeatInterval,

    #[error("connection.heartbeat.max_heartbeats must be greater than zero")]
    ZeroMaxHeartbeats,

    #[error("connection.metrics_update_freq_ms must be greater than zero")]
    ZeroMetricsFrequency,

    #[error("origin.url {url:?} is invalid: {reason}")]
    InvalidOriginUrl { url: String, reason: String },

    #[error("origin.{field} must be greater than zero")]
    ZeroOriginTimeout { field: &'static str },
}

/// Check a parsed configuration, collecting every violation.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = connection_errors(&config.connection);

    match Url::parse(&config.origin.url) {
        Ok(url) if url.scheme() == "http" => {
            if url.host_str().is_none() {
                errors.push(ValidationError::InvalidOriginUrl {
                    url: config.origin.url.clone(),
                    reason: "missing host".to_string(),
                });
            }
        }
        Ok(url) => errors.push(ValidationError::InvalidOriginUrl {
            url: config.origin.url.clone(),
            reason: format!("unsupported scheme {}", url.scheme()),
        }),
        Err(e) => errors.push(ValidationError::InvalidOriginUrl {
            url: config.origin.url.clone(),
            reason: e.to_string(),
        }),
    }

    if config.origin.connect_timeout_ms == 0 {
        errors.push(ValidationError::ZeroOriginTimeout { field: "connect_timeout_ms" });
    }
    if config.origin.request_timeout_ms == 0 {
        errors.push(ValidationError::ZeroOriginTimeout { field: "request_timeout_ms" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check the settings of a single connection.
pub fn validate_connection(config: &ConnectionConfig) -> Result<(), Vec<ValidationError>> {
    let errors = connection_errors(config);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn connection_errors(config: &ConnectionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.heartbeat.interval_ms == 0 {
        errors.push(ValidationError::ZeroHeartbeatInterval);
    }
    if config.heartbeat.max_heartbeats == 0 {
        errors.push(ValidationError::ZeroMaxHeartbeats);
    }
    if config.metrics_update_freq_ms == 0 {
        errors.push(ValidationError::ZeroMetricsFrequency);
    }
    errors
}
