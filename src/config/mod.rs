//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TunnelConfig (validated, immutable)
//!     → ConnectionConfig handed to each Connection at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a connection is built
//! - All fields have defaults to allow minimal configs
//! - Heartbeat and drain timings are explicit fields, never process-wide constants

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, validate_connection, ValidationError};
pub use schema::{
    CompressionSetting, ConnectionConfig, HeartbeatConfig, ObservabilityConfig, OriginConfig,
    TunnelConfig,
};
