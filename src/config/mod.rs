//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → supervisor serializes it into every WorkerSpec
//!
//! In each worker, when reload is enabled:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → route table rebuilt and swapped atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the route table is live-swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::AccessConfig;
pub use schema::ListenerConfig;
pub use schema::RouteConfig;
pub use schema::ServerConfig;
