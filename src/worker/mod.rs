//! Worker process side.
//!
//! # Data Flow
//! ```text
//! `lampd worker` (spawned by the supervisor)
//!     → entry.rs (read WorkerSpec, pin core, build routes + registry)
//!     → state.rs RecoveryLoop
//!         Starting: fresh current-thread runtime
//!         Running:  ConnectionServer::serve_forever
//!         Faulted:  log, sleep backoff, back to Starting
//! ```

pub mod entry;
pub mod state;

pub use entry::run_worker;
pub use state::{EventLoopAttempt, EventLoopFactory, RecoveryLoop, Sleeper, ThreadSleeper, WorkerState};
