//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers
//! - Translate them into a [`ShutdownSignal`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - No other signals are handled; SIGHUP keeps its default action

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, SignalKind};

/// Signal that starts a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM.
    Terminate,
    /// SIGINT (Ctrl-C).
    Interrupt,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
        }
    }
}

/// Installed SIGTERM/SIGINT listeners.
///
/// Install early: a signal arriving before installation gets the default
/// action and kills the process.
pub struct ShutdownSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next SIGTERM or SIGINT.
    pub async fn recv(&mut self) -> ShutdownSignal {
        let received = tokio::select! {
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
        };
        tracing::info!(signal = %received, "Shutdown signal received");
        received
    }
}
