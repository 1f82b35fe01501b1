//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteConfig[] (config file or built-in defaults)
//!     → router.rs builder checks handler ids against registry.rs
//!     → Freeze as immutable RouteTable
//!     → snapshot.rs publishes it as version 1
//!
//! Incoming Request (path, method)
//!     → snapshot.rs (current table)
//!     → router.rs (resolve)
//!     → Found(entry) | MethodNotAllowed | NotFound
//! ```
//!
//! # Design Decisions
//! - No global registry: tables are built from an explicit descriptor list
//! - Tables are immutable; reloads replace the whole table atomically
//! - Explicit NotFound / MethodNotAllowed rather than silent default

pub mod registry;
pub mod router;
pub mod snapshot;

pub use registry::{Handler, HandlerRegistry, HandlerResponse, Payload};
pub use router::{Resolution, RouteEntry, RouteTable, RouteTableError};
pub use snapshot::RouteSnapshot;
