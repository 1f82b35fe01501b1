//! Multi-process worker supervision.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     sizing.rs (core count → worker count)
//!     → spawn.rs (re-exec self as `lampd worker`, WorkerSpec in env)
//!     → pool.rs (one WorkerSlot per worker)
//!
//! Every poll interval:
//!     pool.rs reconcile → process.rs try_wait → respawn dead slots
//!
//! SIGTERM / SIGINT:
//!     pool.rs shutdown (once) → SIGTERM all → grace → SIGKILL → reap
//! ```
//!
//! # Design Decisions
//! - Any worker exit is replaced while the pool is running, clean or not
//! - No supervisor-side restart backoff; workers back off internally
//! - Workers run in their own process group

pub mod pool;
pub mod process;
pub mod sizing;
pub mod spawn;

pub use pool::{ShutdownOutcome, SupervisorError, SupervisorState, WorkerSlot, WorkerSupervisor};
pub use process::{ChildProcess, TerminationReason, WorkerProcess};
pub use sizing::{detect_cores, size_pool};
pub use spawn::{ExecLauncher, WorkerLauncher, WorkerSpec, WORKER_SPEC_ENV};
