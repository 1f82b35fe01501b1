//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor (startup.rs run_supervisor):
//!     Config → compile routes → install signals → spawn pool → monitor
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → WorkerSupervisor::shutdown (first one wins)
//!
//! Worker (startup.rs run_worker_from_env):
//!     LAMPD_WORKER_SPEC → worker::run_worker (never returns)
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then routes, then processes
//! - Graceful shutdown always ends with exit status 0

pub mod signals;
pub mod startup;

pub use signals::{ShutdownSignal, ShutdownSignals};
pub use startup::{check_config, compile_routes, run_supervisor, run_worker_from_env};
