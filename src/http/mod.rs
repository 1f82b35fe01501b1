//! Thin request/response layer.
//!
//! # Data Flow
//! ```text
//! Accepted TcpStream
//!     → request.rs (request line, headers, Content-Length body, payload)
//!     → server.rs (allow-list, route lookup, credential check, handler)
//!     → response.rs (status line, JSON body, X-Request-Id)
//!     → Close connection
//! ```
//!
//! # Design Decisions
//! - One request per connection, always `Connection: close`
//! - Not a general HTTP/1.1 implementation: no chunked bodies, no keep-alive
//! - Every failure below the listener maps to a status code, never a crash

pub mod request;
pub mod response;
pub mod server;

pub use request::{DecodeError, Request};
pub use response::Response;
pub use server::{ConnectionServer, ServeError};
