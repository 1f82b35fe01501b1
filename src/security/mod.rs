//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Connection accepted on the internal listener
//!     → access_control.rs (peer IP against the allow-list)
//!     → 403 and close, or continue to decode
//! ```

pub mod access_control;

pub use access_control::IpAllowList;
