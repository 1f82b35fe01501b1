//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor and worker processes
//!     → logging.rs (tracing subscriber, pretty or JSON lines on stdout)
//! ```

pub mod logging;

pub use logging::init_logging;
