//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Worker process
//!     → listener.rs (bind with SO_REUSEPORT, accept loop)
//!     → connection.rs (connection id, live-connection count)
//!     → Hand off to the HTTP layer (one request per connection)
//! ```
//!
//! # Design Decisions
//! - Every worker binds the same port; the kernel spreads connections
//! - Public and internal listeners share the same accept path

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError, ListenerKind};
