//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for lampd.
//! All types derive Serde traits so the resolved config can be read from
//! a TOML file and handed to worker processes as JSON.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Default public port of the service.
pub const DEFAULT_PORT: u16 = 8866;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (host, port, backlog).
    pub listener: ListenerConfig,

    /// Worker pool supervision settings.
    pub supervisor: SupervisorConfig,

    /// Per-worker recovery loop settings.
    pub worker: WorkerConfig,

    /// Request handling limits.
    pub server: RequestConfig,

    /// Bearer credential settings.
    pub auth: AuthConfig,

    /// Internal-use listener and its allow-list.
    pub access: AccessConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Route descriptors. Empty means "use the built-in routes".
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Public port shared by every worker.
    pub port: u16,

    /// Listen backlog per worker socket.
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            backlog: 128,
        }
    }
}

/// Worker pool supervision settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Explicit worker count. `None` sizes the pool from the core count.
    pub workers: Option<usize>,

    /// Liveness poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// How long shutdown waits for a worker after SIGTERM before SIGKILL.
    pub shutdown_grace_secs: u64,

    /// Pin each worker process to one CPU core.
    pub pin_workers: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: None,
            poll_interval_ms: 1000,
            shutdown_grace_secs: 10,
            pin_workers: false,
        }
    }
}

/// Per-worker recovery loop settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Fixed delay between a faulted event loop and the next attempt.
    pub restart_backoff_ms: u64,

    /// Watch the config file and swap the route table on change.
    pub reload_routes: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            restart_backoff_ms: 3000,
            reload_routes: true,
        }
    }
}

/// Request handling limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RequestConfig {
    /// Maximum size of one request (head + body) in bytes.
    pub max_request_bytes: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: 64 * 1024,
        }
    }
}

/// Bearer credential settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Internal-use listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Optional second port reserved for callers on the local network.
    pub internal_port: Option<u16>,

    /// Addresses allowed on the internal port in addition to the local /24.
    pub allowed_ips: Vec<IpAddr>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// One route descriptor: which handler serves `(path, method)`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Exact request path (e.g., "/hello").
    pub path: String,

    /// Request method; normalized to upper case.
    #[serde(default = "default_method")]
    pub method: String,

    /// Handler identifier in the handler registry.
    pub handler: String,

    /// Whether a bearer credential is required.
    #[serde(default = "default_credential_required")]
    pub credential_required: bool,

    /// Whether the credential must carry a role.
    #[serde(default)]
    pub role_required: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_credential_required() -> bool {
    true
}
