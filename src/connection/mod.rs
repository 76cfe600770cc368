//! Connection lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Connection::serve(shutdown)
//!     ├─ accept loop (supervisor.rs) → one task per stream → stream::serve_stream
//!     ├─ heartbeat.rs → probe every interval → TimedOut after max misses
//!     └─ on cancel / accept error / heartbeat timeout → drain → close → ConnectionError
//! ```
//!
//! # Design Decisions
//! - One cancellation token tree per connection: shutdown → streams → heartbeat
//! - Stream failures and panics stay inside their task
//! - Configuration is read-only once the connection is built

pub mod heartbeat;
pub mod supervisor;

pub use heartbeat::{HeartbeatMonitor, HeartbeatResult};
pub use supervisor::{Connection, ConnectionError, ConnectionState};
