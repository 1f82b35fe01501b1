//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid)
//! - Detect duplicate route descriptors
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Handler ids are checked later, when the route table is built against
//!   the handler registry

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic rule and collect all failures.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }
    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::new("listener.backlog", "must be non-zero"));
    }

    if config.supervisor.workers == Some(0) {
        errors.push(ValidationError::new(
            "supervisor.workers",
            "must be at least 1 when set",
        ));
    }
    if config.supervisor.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "supervisor.poll_interval_ms",
            "must be non-zero",
        ));
    }

    if config.server.max_request_bytes < 64 {
        errors.push(ValidationError::new(
            "server.max_request_bytes",
            "must be at least 64 bytes",
        ));
    }

    if config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::new("auth.jwt_secret", "must not be empty"));
    }

    if let Some(internal) = config.access.internal_port {
        if internal == 0 {
            errors.push(ValidationError::new("access.internal_port", "must be non-zero"));
        } else if internal == config.listener.port {
            errors.push(ValidationError::new(
                "access.internal_port",
                "must differ from listener.port",
            ));
        }
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}'", config.observability.log_format),
        ));
    }

    let mut seen = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        if !route.path.starts_with('/') {
            errors.push(ValidationError::new(
                format!("routes[{i}].path"),
                "must start with '/'",
            ));
        }
        if route.method.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("routes[{i}].method"),
                "must not be empty",
            ));
        }
        if route.role_required && !route.credential_required {
            errors.push(ValidationError::new(
                format!("routes[{i}].role_required"),
                "requires credential_required",
            ));
        }
        if !seen.insert((route.path.clone(), route.method.to_uppercase())) {
            errors.push(ValidationError::new(
                format!("routes[{i}]"),
                format!("duplicate route {} {}", route.method.to_uppercase(), route.path),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
