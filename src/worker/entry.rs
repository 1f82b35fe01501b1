//! Worker process entry point.
//!
//! Sets up the long-lived pieces once (route snapshot, handler registry,
//! credential validator), then hands control to the recovery loop, which
//! builds a fresh single-threaded runtime for every attempt.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::auth::JwtValidator;
use crate::config::watcher::ConfigWatcher;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::handlers::{builtin_registry, effective_routes};
use crate::http::{ConnectionServer, ServeError};
use crate::routing::{HandlerRegistry, RouteSnapshot, RouteTable};
use crate::supervisor::WorkerSpec;
use crate::worker::state::{EventLoopAttempt, EventLoopFactory, RecoveryLoop, ThreadSleeper};

/// Run this process as a worker. Never returns unless setup fails.
pub fn run_worker(spec: WorkerSpec) -> Result<Infallible> {
    let pid = std::process::id();
    tracing::info!(slot = spec.slot, pid, "Worker starting");

    if let Some(core) = spec.core {
        pin_to_core(spec.slot, core);
    }

    let factory = TokioLoopFactory::from_spec(&spec)?;
    let backoff = Duration::from_millis(spec.config.worker.restart_backoff_ms);
    RecoveryLoop::new(factory, ThreadSleeper, backoff).run_forever()
}

fn pin_to_core(slot: usize, core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core))
        .map(core_affinity::set_for_current)
        .unwrap_or(false);
    if pinned {
        tracing::info!(slot, core, "Worker pinned to core");
    } else {
        tracing::warn!(slot, core, "Could not pin worker to core");
    }
}

/// The config whose routes are in the snapshot right now.
///
/// Outlives every event-loop attempt, so a rebuilt watcher compares new
/// file revisions against what is actually being served.
#[derive(Clone)]
struct AppliedRoutes {
    config: Arc<Mutex<ServerConfig>>,
}

impl AppliedRoutes {
    fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn current(&self) -> ServerConfig {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ServerConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a worker needs to rebuild its route table when the file changes.
#[derive(Clone)]
struct RouteReload {
    path: PathBuf,
    applied: AppliedRoutes,
    snapshot: Arc<RouteSnapshot>,
    registry: Arc<HandlerRegistry>,
}

impl RouteReload {
    /// Start the file watcher and spawn the reload task on `runtime`.
    fn start(&self, runtime: &Runtime) -> Option<notify::RecommendedWatcher> {
        let (watcher, mut updates) = ConfigWatcher::new(&self.path, self.applied.current());
        let watcher = match watcher.run() {
            Ok(watcher) => watcher,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Route reload disabled");
                return None;
            }
        };

        let reload = self.clone();
        runtime.spawn(async move {
            while let Some(config) = updates.recv().await {
                reload.apply(config);
            }
        });
        Some(watcher)
    }

    /// Swap in the routes of `config` if they differ from the served ones.
    /// A table that fails to build leaves everything as it was.
    fn apply(&self, config: ServerConfig) {
        let mut applied = self.applied.lock();
        let routes = effective_routes(&config.routes);
        if routes == effective_routes(&applied.routes) {
            *applied = config;
            return;
        }
        match RouteTable::from_descriptors(&routes, &self.registry) {
            Ok(table) => {
                self.snapshot.swap(table);
                *applied = config;
            }
            Err(e) => {
                tracing::error!(error = %e, "Rejected route reload; keeping current table");
            }
        }
    }
}

struct TokioLoopFactory {
    slot: usize,
    server: ConnectionServer,
    reload: Option<RouteReload>,
}

impl TokioLoopFactory {
    /// Build the long-lived pieces shared by every attempt.
    fn from_spec(spec: &WorkerSpec) -> Result<Self> {
        let registry = Arc::new(builtin_registry());
        let routes = effective_routes(&spec.config.routes);
        let table = RouteTable::from_descriptors(&routes, &registry)?;
        let snapshot = Arc::new(RouteSnapshot::new(table));
        let validator = Arc::new(JwtValidator::new(&spec.config.auth.jwt_secret));

        let server = ConnectionServer::new(
            spec.config.clone(),
            Arc::clone(&snapshot),
            Arc::clone(&registry),
            validator,
        )
        .with_slot(spec.slot);

        let reload = match (&spec.config_path, spec.config.worker.reload_routes) {
            (Some(path), true) => Some(RouteReload {
                path: path.clone(),
                applied: AppliedRoutes::new(spec.config.clone()),
                snapshot,
                registry,
            }),
            _ => None,
        };

        Ok(Self {
            slot: spec.slot,
            server,
            reload,
        })
    }
}

impl EventLoopFactory for TokioLoopFactory {
    type Attempt = TokioAttempt;

    fn build(&mut self) -> std::io::Result<TokioAttempt> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let watcher = self
            .reload
            .as_ref()
            .and_then(|reload| reload.start(&runtime));
        tracing::debug!(slot = self.slot, "Worker event loop built");
        Ok(TokioAttempt {
            runtime,
            server: self.server.clone(),
            _watcher: watcher,
        })
    }
}

/// One runtime plus what lives inside it. Dropped as a unit.
struct TokioAttempt {
    runtime: Runtime,
    server: ConnectionServer,
    _watcher: Option<notify::RecommendedWatcher>,
}

impl EventLoopAttempt for TokioAttempt {
    fn run(self) -> std::result::Result<(), ServeError> {
        let TokioAttempt {
            runtime,
            server,
            _watcher,
        } = self;
        runtime.block_on(server.serve_forever())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::loader::{load_config, parse_config};
    use crate::routing::Resolution;

    const HELLO_ONLY: &str = r#"
[[routes]]
path = "/hello"
handler = "greeting.hello"
credential_required = false
"#;

    const HEALTH_ONLY: &str = r#"
[[routes]]
path = "/health"
handler = "system.health"
credential_required = false
"#;

    const UNKNOWN_HANDLER: &str = r#"
[[routes]]
path = "/hello"
handler = "greeting.missing"
credential_required = false
"#;

    fn spec_for(path: &Path) -> WorkerSpec {
        WorkerSpec {
            slot: 0,
            core: None,
            config: load_config(path).unwrap(),
            config_path: Some(path.to_path_buf()),
        }
    }

    fn snapshot_of(factory: &TokioLoopFactory) -> Arc<RouteSnapshot> {
        Arc::clone(&factory.reload.as_ref().unwrap().snapshot)
    }

    fn serves(snapshot: &RouteSnapshot, path: &str) -> bool {
        matches!(snapshot.load().table.resolve(path, "GET"), Resolution::Found(_))
    }

    /// Run the attempt's runtime until `done` holds; false after 10 s.
    fn drive_until(attempt: &TokioAttempt, done: impl Fn() -> bool) -> bool {
        attempt.runtime.block_on(async {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while !done() {
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            true
        })
    }

    fn drive_for(attempt: &TokioAttempt, duration: Duration) {
        attempt.runtime.block_on(async { tokio::time::sleep(duration).await });
    }

    #[test]
    fn file_change_swaps_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lampd.toml");
        std::fs::write(&path, HELLO_ONLY).unwrap();

        let mut factory = TokioLoopFactory::from_spec(&spec_for(&path)).unwrap();
        let snapshot = snapshot_of(&factory);
        let attempt = factory.build().unwrap();
        assert!(serves(&snapshot, "/hello"));

        std::fs::write(&path, HEALTH_ONLY).unwrap();
        assert!(drive_until(&attempt, || serves(&snapshot, "/health")));
        assert!(!serves(&snapshot, "/hello"));

        drive_for(&attempt, Duration::from_millis(300));
        assert_eq!(snapshot.version(), 2);
    }

    #[test]
    fn invalid_revisions_keep_current_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lampd.toml");
        std::fs::write(&path, HELLO_ONLY).unwrap();

        let mut factory = TokioLoopFactory::from_spec(&spec_for(&path)).unwrap();
        let snapshot = snapshot_of(&factory);
        let attempt = factory.build().unwrap();

        std::fs::write(&path, UNKNOWN_HANDLER).unwrap();
        drive_for(&attempt, Duration::from_millis(700));
        assert_eq!(snapshot.version(), 1);
        assert!(serves(&snapshot, "/hello"));

        std::fs::write(&path, "[[routes]\npath =").unwrap();
        drive_for(&attempt, Duration::from_millis(700));
        assert_eq!(snapshot.version(), 1);
        assert!(serves(&snapshot, "/hello"));

        // The watcher is still alive after the bad revisions.
        std::fs::write(&path, HEALTH_ONLY).unwrap();
        assert!(drive_until(&attempt, || serves(&snapshot, "/health")));
    }

    #[test]
    fn reload_after_rebuilt_attempt_compares_against_served_routes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lampd.toml");
        std::fs::write(&path, HELLO_ONLY).unwrap();

        let mut factory = TokioLoopFactory::from_spec(&spec_for(&path)).unwrap();
        let snapshot = snapshot_of(&factory);

        let first = factory.build().unwrap();
        std::fs::write(&path, HEALTH_ONLY).unwrap();
        assert!(drive_until(&first, || serves(&snapshot, "/health")));
        drop(first);

        // The event loop faulted and was rebuilt; the file goes back to
        // its startup content.
        let second = factory.build().unwrap();
        std::fs::write(&path, HELLO_ONLY).unwrap();
        assert!(
            drive_until(&second, || serves(&snapshot, "/hello")),
            "worker kept serving the pre-fault table"
        );
        assert!(!serves(&snapshot, "/health"));

        drive_for(&second, Duration::from_millis(300));
        assert_eq!(snapshot.version(), 3);
    }

    #[test]
    fn apply_swaps_only_on_route_changes() {
        let registry = Arc::new(builtin_registry());
        let startup = parse_config(HELLO_ONLY).unwrap();
        let table = RouteTable::from_descriptors(&startup.routes, &registry).unwrap();
        let reload = RouteReload {
            path: PathBuf::from("unused.toml"),
            applied: AppliedRoutes::new(startup.clone()),
            snapshot: Arc::new(RouteSnapshot::new(table)),
            registry,
        };

        let mut other_port = startup.clone();
        other_port.listener.port = 9100;
        reload.apply(other_port);
        assert_eq!(reload.snapshot.version(), 1);
        assert_eq!(reload.applied.current().listener.port, 9100);

        reload.apply(parse_config(UNKNOWN_HANDLER).unwrap());
        assert_eq!(reload.snapshot.version(), 1);
        assert_eq!(reload.applied.current().routes, startup.routes);

        reload.apply(parse_config(HEALTH_ONLY).unwrap());
        assert_eq!(reload.snapshot.version(), 2);
        assert!(serves(&reload.snapshot, "/health"));

        // Dropping every route falls back to the built-in defaults.
        reload.apply(ServerConfig::default());
        assert_eq!(reload.snapshot.version(), 3);
        assert!(serves(&reload.snapshot, "/hello"));
        assert!(serves(&reload.snapshot, "/health"));
    }

    #[test]
    fn reload_needs_a_path_and_the_flag() {
        let mut spec = WorkerSpec {
            slot: 1,
            core: None,
            config: ServerConfig::default(),
            config_path: None,
        };
        assert!(TokioLoopFactory::from_spec(&spec).unwrap().reload.is_none());

        spec.config_path = Some(PathBuf::from("lampd.toml"));
        spec.config.worker.reload_routes = false;
        assert!(TokioLoopFactory::from_spec(&spec).unwrap().reload.is_none());

        spec.config.worker.reload_routes = true;
        assert!(TokioLoopFactory::from_spec(&spec).unwrap().reload.is_some());
    }
}
