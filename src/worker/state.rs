//! Worker recovery state machine.
//!
//! ```text
//! Starting ──build ok──▶ Running ──serve returned──▶ Faulted(backoff)
//!    ▲  └──build failed─────────────────────────────────▶ │
//!    └───────────────────── sleep(backoff) ◀───────────────┘
//! ```
//!
//! Each Starting builds a fresh event loop; it is consumed by Running and
//! dropped before Faulted. The loop never terminates on its own.

use std::time::Duration;

use crate::http::ServeError;

/// Where the recovery loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Faulted { backoff: Duration },
}

/// One event-loop lifetime: built in Starting, run to completion in Running.
pub trait EventLoopAttempt {
    /// Serve until the loop fails. `Ok` is an unexpected return.
    fn run(self) -> Result<(), ServeError>;
}

/// Builds a fresh attempt for every Starting.
pub trait EventLoopFactory {
    type Attempt: EventLoopAttempt;

    fn build(&mut self) -> std::io::Result<Self::Attempt>;
}

/// Blocking pause between attempts.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Drives the Starting → Running → Faulted cycle.
pub struct RecoveryLoop<F: EventLoopFactory, S: Sleeper> {
    factory: F,
    sleeper: S,
    backoff: Duration,
    state: WorkerState,
    pending: Option<F::Attempt>,
    attempts: u64,
    faults: u64,
}

impl<F: EventLoopFactory, S: Sleeper> RecoveryLoop<F, S> {
    pub fn new(factory: F, sleeper: S, backoff: Duration) -> Self {
        Self {
            factory,
            sleeper,
            backoff,
            state: WorkerState::Starting,
            pending: None,
            attempts: 0,
            faults: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Event loops built so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Transitions into Faulted so far.
    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Perform one transition and return the new state.
    pub fn step(&mut self) -> WorkerState {
        self.state = match self.state {
            WorkerState::Starting => match self.factory.build() {
                Ok(attempt) => {
                    self.attempts += 1;
                    self.pending = Some(attempt);
                    tracing::debug!(attempt = self.attempts, "Event loop built");
                    WorkerState::Running
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build event loop");
                    self.fault()
                }
            },
            WorkerState::Running => {
                match self.pending.take().map(EventLoopAttempt::run) {
                    Some(Err(e)) => tracing::error!(error = %e, "Event loop failed"),
                    Some(Ok(())) => tracing::error!("Event loop returned unexpectedly"),
                    None => tracing::error!("Running without an event loop"),
                }
                self.fault()
            }
            WorkerState::Faulted { backoff } => {
                tracing::info!(backoff = ?backoff, "Restarting event loop after backoff");
                self.sleeper.sleep(backoff);
                WorkerState::Starting
            }
        };
        self.state
    }

    /// Step forever.
    pub fn run_forever(&mut self) -> ! {
        loop {
            self.step();
        }
    }

    fn fault(&mut self) -> WorkerState {
        self.faults += 1;
        WorkerState::Faulted {
            backoff: self.backoff,
        }
    }
}
