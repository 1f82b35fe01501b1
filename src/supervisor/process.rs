//! Handles to running worker processes.
//!
//! The supervisor talks to workers only through [`WorkerProcess`], so the
//! pool logic can be tested without forking.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Status could not be interpreted.
    Unknown,
}

impl TerminationReason {
    /// Whether the worker exited on its own with status 0.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {:?}", sig),
            Self::Unknown => f.write_str("unknown reason"),
        }
    }
}

impl From<ExitStatus> for TerminationReason {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        status
            .signal()
            .and_then(|raw| Signal::try_from(raw).ok())
            .map(Self::Signaled)
            .unwrap_or(Self::Unknown)
    }
}

/// A live (or recently dead) worker process.
pub trait WorkerProcess: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Non-blocking liveness check. `Ok(Some(_))` once the process has
    /// exited and been reaped.
    fn try_wait(&mut self) -> io::Result<Option<TerminationReason>>;

    /// Ask the process to stop (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to stop (SIGKILL) and reap it.
    fn kill(&mut self) -> io::Result<()>;
}

/// A worker spawned with `std::process::Command`.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    reaped: bool,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }
}

impl WorkerProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<TerminationReason>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status.map(TerminationReason::from))
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        signal::kill(self.pid(), Signal::SIGTERM).map_err(io::Error::from)
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        self.child.kill()?;
        self.child.wait()?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.reaped = true;
        }
    }
}
