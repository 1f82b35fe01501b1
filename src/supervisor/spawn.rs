//! Launching worker processes.
//!
//! Workers are the same binary re-executed with the hidden `worker`
//! subcommand. Everything a worker needs travels as JSON in one
//! environment variable, so the child never re-reads or re-resolves the
//! parent's configuration.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::supervisor::process::{ChildProcess, WorkerProcess};

/// Environment variable carrying the serialized [`WorkerSpec`].
pub const WORKER_SPEC_ENV: &str = "LAMPD_WORKER_SPEC";

/// Subcommand that puts the binary in worker mode.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Startup arguments of one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Slot index in the pool.
    pub slot: usize,
    /// Core to pin the worker to, if pinning is enabled.
    pub core: Option<usize>,
    /// Fully resolved configuration, routes included.
    pub config: ServerConfig,
    /// Config file to watch for route reloads.
    pub config_path: Option<PathBuf>,
}

impl WorkerSpec {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read the spec the supervisor handed to this process.
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(WORKER_SPEC_ENV)
            .map_err(|e| Error::WorkerSpec(format!("{WORKER_SPEC_ENV}: {e}")))?;
        Self::from_json(&raw)
    }
}

/// Starts worker processes for the supervisor.
pub trait WorkerLauncher: Send + Sync {
    type Process: WorkerProcess;

    fn launch(&self, spec: &WorkerSpec) -> io::Result<Self::Process>;
}

/// Launches workers by re-executing a binary in worker mode.
#[derive(Debug, Clone)]
pub struct ExecLauncher {
    exe: PathBuf,
}

impl ExecLauncher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Launch copies of the running binary.
    pub fn current() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl WorkerLauncher for ExecLauncher {
    type Process = ChildProcess;

    fn launch(&self, spec: &WorkerSpec) -> io::Result<ChildProcess> {
        let spec_json = spec
            .to_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        let child = Command::new(&self.exe)
            .arg(WORKER_SUBCOMMAND)
            .env(WORKER_SPEC_ENV, spec_json)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // Own process group: a terminal Ctrl-C reaches only the supervisor.
            .process_group(0)
            .spawn()?;

        tracing::debug!(slot = spec.slot, pid = child.id(), exe = %self.exe.display(), "Worker launched");
        Ok(ChildProcess::new(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_survives_json() {
        let spec = WorkerSpec {
            slot: 3,
            core: Some(1),
            config: ServerConfig::default(),
            config_path: Some(PathBuf::from("/etc/lampd.toml")),
        };
        let back = WorkerSpec::from_json(&spec.to_json().unwrap()).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn garbage_spec_is_an_error() {
        assert!(WorkerSpec::from_json("{\"slot\":").is_err());
    }

    #[test]
    fn missing_binary_fails_to_launch() {
        let launcher = ExecLauncher::new("/nonexistent/lampd");
        let spec = WorkerSpec {
            slot: 0,
            core: None,
            config: ServerConfig::default(),
            config_path: None,
        };
        assert!(launcher.launch(&spec).is_err());
    }
}
