//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate routes against the handler registry before any fork
//! - Start the worker pool and its monitor
//! - Wait for SIGTERM/SIGINT and tear the pool down
//! - Enter worker mode from the inherited WorkerSpec
//!
//! # Design Decisions
//! - Fail fast: a bad route table or a failed initial spawn is fatal
//! - Signal handlers are installed before the first worker is spawned

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::config::loader::load_config;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::handlers::{builtin_registry, effective_routes};
use crate::lifecycle::signals::ShutdownSignals;
use crate::observability::init_logging;
use crate::routing::RouteTable;
use crate::supervisor::{ExecLauncher, ShutdownOutcome, WorkerSpec, WorkerSupervisor};
use crate::worker::run_worker;

/// Build the route table the workers will use. Unknown handler ids and
/// duplicate routes are errors.
pub fn compile_routes(config: &ServerConfig) -> Result<RouteTable> {
    let registry = builtin_registry();
    Ok(RouteTable::from_descriptors(&effective_routes(&config.routes), &registry)?)
}

/// Load a config file and compile its routes without starting anything.
pub fn check_config(path: &Path) -> Result<(ServerConfig, RouteTable)> {
    let config = load_config(path)?;
    let table = compile_routes(&config)?;
    Ok((config, table))
}

/// Run the supervisor until a shutdown signal has been handled.
pub async fn run_supervisor(config: ServerConfig, config_path: Option<PathBuf>) -> Result<ExitCode> {
    let mut signals = ShutdownSignals::install()?;

    let table = compile_routes(&config)?;
    tracing::info!(
        port = config.listener.port,
        internal_port = ?config.access.internal_port,
        routes = table.len(),
        "Configuration loaded"
    );

    let supervisor = Arc::new(WorkerSupervisor::new(
        ExecLauncher::current()?,
        config,
        config_path,
    ));
    supervisor.start()?;

    let monitor = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.monitor().await }
    });

    let signal = signals.recv().await;
    let mut teardown = tokio::task::spawn_blocking({
        let supervisor = Arc::clone(&supervisor);
        move || supervisor.shutdown(signal)
    });

    let outcome = loop {
        tokio::select! {
            joined = &mut teardown => break joined.map_err(std::io::Error::other)?,
            again = signals.recv() => {
                if supervisor.shutdown(again) == ShutdownOutcome::AlreadyTerminating {
                    tracing::info!(signal = %again, "Shutdown already in progress");
                }
            }
        }
    };

    if let Err(e) = monitor.await {
        tracing::warn!(error = %e, "Monitor task ended abnormally");
    }
    tracing::info!(outcome = ?outcome, "Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Worker mode: read the spec from the environment and serve forever.
pub fn run_worker_from_env() -> Result<Infallible> {
    let spec = WorkerSpec::from_env()?;
    if let Err(e) = init_logging(&spec.config.observability) {
        eprintln!("lampd worker: logging disabled: {e}");
    }
    let span = tracing::info_span!("worker", slot = spec.slot, pid = std::process::id());
    let _entered = span.enter();
    run_worker(spec)
}
