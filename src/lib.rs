//! Tunnel connection and stream lifecycle library

pub mod config;
pub mod connection;
pub mod mux;
pub mod observability;
pub mod origin;
pub mod stream;

pub use config::schema::TunnelConfig;
pub use connection::{Connection, ConnectionError, ConnectionState};
pub use origin::HttpOrigin;
