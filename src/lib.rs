//! lampd: light-belt control service.
//!
//! A small HTTP service for the LED strip on robotic mowers, served by a
//! supervised pool of worker processes.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── supervisor process ───────────────────────┐
//!                 │  lifecycle::startup → supervisor::pool (size, spawn, monitor)     │
//!                 │        ▲ SIGTERM/SIGINT                 │ re-exec `lampd worker`  │
//!                 └────────┼────────────────────────────────┼─────────────────────────┘
//!                          │                                ▼
//!                 ┌──────────────────────── worker process (× N) ─────────────────────┐
//!   Client ──────▶│  net::listener (SO_REUSEPORT) → http::server → routing → handlers │
//!                 │  worker::state  Starting → Running → Faulted(backoff) → Starting  │
//!                 │  config::watcher → routing::snapshot (route table swap)           │
//!                 └───────────────────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Request handling
pub mod auth;
pub mod handlers;

// Process model
pub mod lifecycle;
pub mod supervisor;
pub mod worker;

// Cross-cutting concerns
pub mod error;
pub mod observability;
pub mod security;

pub use config::schema::ServerConfig;
pub use error::{Error, Result};
pub use http::ConnectionServer;
pub use supervisor::WorkerSupervisor;
