//! Error types for lampd.

use thiserror::Error;

use crate::auth::CredentialError;
use crate::config::loader::ConfigError;
use crate::http::server::ServeError;
use crate::routing::RouteTableError;
use crate::supervisor::SupervisorError;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Route table error: {0}")]
    Routes(#[from] RouteTableError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Server error: {0}")]
    Serve(#[from] ServeError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid worker spec: {0}")]
    WorkerSpec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for lampd operations.
pub type Result<T> = std::result::Result<T, Error>;
