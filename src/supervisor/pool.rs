//! Worker pool supervision.
//!
//! The pool has a fixed number of slots decided at startup. Each slot holds
//! at most one worker process. `reconcile` refills every slot whose process
//! is gone; `shutdown` tears the whole pool down exactly once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ServerConfig;
use crate::lifecycle::signals::ShutdownSignal;
use crate::supervisor::process::{TerminationReason, WorkerProcess};
use crate::supervisor::sizing::{detect_cores, worker_count};
use crate::supervisor::spawn::{WorkerLauncher, WorkerSpec};

const RUNNING: u8 = 0;
const TERMINATING: u8 = 1;

/// How often shutdown re-checks workers during the grace period.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Errors from the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker for slot {slot}: {source}")]
    Spawn {
        slot: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("supervisor is terminating")]
    Terminating,
}

/// Supervisor lifecycle. The only transition is Running -> Terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    Terminating,
}

/// Result of a `shutdown` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// This call performed the teardown.
    Completed {
        /// Workers that exited within the grace period.
        stopped: usize,
        /// Workers that had to be SIGKILLed.
        killed: usize,
    },
    /// Another call already owns the teardown.
    AlreadyTerminating,
}

/// One position in the pool.
#[derive(Debug)]
pub struct WorkerSlot<P> {
    pub index: usize,
    pub core: Option<usize>,
    /// `None` after the process died and a respawn failed.
    pub process: Option<P>,
    pub restarts: u32,
}

/// Parent-side pool of worker processes.
pub struct WorkerSupervisor<L: WorkerLauncher> {
    launcher: L,
    config: ServerConfig,
    config_path: Option<PathBuf>,
    worker_count: usize,
    cores: usize,
    poll_interval: Duration,
    shutdown_grace: Duration,
    state: AtomicU8,
    slots: Mutex<Vec<WorkerSlot<L::Process>>>,
}

impl<L: WorkerLauncher> WorkerSupervisor<L> {
    pub fn new(launcher: L, config: ServerConfig, config_path: Option<PathBuf>) -> Self {
        let cores = detect_cores();
        let supervisor = &config.supervisor;
        Self {
            worker_count: worker_count(supervisor, cores),
            cores,
            poll_interval: Duration::from_millis(supervisor.poll_interval_ms),
            shutdown_grace: Duration::from_secs(supervisor.shutdown_grace_secs),
            launcher,
            config,
            config_path,
            state: AtomicU8::new(RUNNING),
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn state(&self) -> SupervisorState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => SupervisorState::Running,
            _ => SupervisorState::Terminating,
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.state() == SupervisorState::Terminating
    }

    /// Pids of the live slots, by slot index.
    pub fn worker_pids(&self) -> Vec<Option<u32>> {
        self.lock_slots()
            .iter()
            .map(|slot| slot.process.as_ref().map(|p| p.id()))
            .collect()
    }

    /// Total respawns across all slots.
    pub fn restart_count(&self) -> u32 {
        self.lock_slots().iter().map(|slot| slot.restarts).sum()
    }

    /// Spawn one worker per slot. Any spawn failure is fatal; workers
    /// already started are dropped, which kills them.
    pub fn start(&self) -> Result<(), SupervisorError> {
        if self.is_terminating() {
            return Err(SupervisorError::Terminating);
        }

        let mut slots = Vec::with_capacity(self.worker_count);
        for index in 0..self.worker_count {
            let core = self.config.supervisor.pin_workers.then(|| index % self.cores);
            let process = self
                .launcher
                .launch(&self.spec_for(index, core))
                .map_err(|source| SupervisorError::Spawn { slot: index, source })?;
            tracing::info!(slot = index, pid = process.id(), core = ?core, "Worker started");
            slots.push(WorkerSlot {
                index,
                core,
                process: Some(process),
                restarts: 0,
            });
        }

        *self.lock_slots() = slots;
        tracing::info!(workers = self.worker_count, cores = self.cores, "Worker pool started");
        Ok(())
    }

    /// One liveness pass: refill every slot whose worker is gone. Returns
    /// the number of workers spawned. Does nothing once terminating.
    pub fn reconcile(&self) -> usize {
        if self.is_terminating() {
            return 0;
        }
        let mut slots = self.lock_slots();
        let mut spawned = 0;

        for slot in slots.iter_mut() {
            // Shutdown may have started while this pass held the lock.
            if self.is_terminating() {
                break;
            }
            if let Some(process) = slot.process.as_mut() {
                let reason = match process.try_wait() {
                    Ok(None) => continue,
                    Ok(Some(reason)) => reason,
                    Err(e) => {
                        tracing::warn!(slot = slot.index, error = %e, "Lost track of worker");
                        TerminationReason::Unknown
                    }
                };
                tracing::warn!(
                    slot = slot.index,
                    pid = process.id(),
                    reason = %reason,
                    "Worker exited; replacing"
                );
                slot.process = None;
            }

            match self.launcher.launch(&self.spec_for(slot.index, slot.core)) {
                Ok(process) => {
                    slot.restarts += 1;
                    spawned += 1;
                    tracing::info!(
                        slot = slot.index,
                        pid = process.id(),
                        restarts = slot.restarts,
                        "Worker replaced"
                    );
                    slot.process = Some(process);
                }
                Err(e) => {
                    tracing::error!(slot = slot.index, error = %e, "Failed to respawn worker; retrying next tick");
                }
            }
        }
        spawned
    }

    /// Reconcile every poll interval until shutdown starts.
    pub async fn monitor(&self) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;

        loop {
            tick.tick().await;
            if self.is_terminating() {
                break;
            }
            self.reconcile();
        }
        tracing::debug!("Monitor loop stopped");
    }

    /// Stop every worker: SIGTERM, wait up to the grace period, SIGKILL the
    /// rest, reap all. Only the first call does anything. Blocks the
    /// calling thread for at most the grace period plus reaping.
    pub fn shutdown(&self, signal: ShutdownSignal) -> ShutdownOutcome {
        if self
            .state
            .compare_exchange(RUNNING, TERMINATING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(signal = %signal, "Shutdown already in progress");
            return ShutdownOutcome::AlreadyTerminating;
        }
        tracing::info!(signal = %signal, grace = ?self.shutdown_grace, "Shutting down worker pool");

        let mut slots = self.lock_slots();
        for slot in slots.iter_mut() {
            if let Some(process) = slot.process.as_mut() {
                if let Err(e) = process.terminate() {
                    tracing::warn!(slot = slot.index, pid = process.id(), error = %e, "SIGTERM failed");
                }
            }
        }

        let deadline = Instant::now() + self.shutdown_grace;
        let mut stopped = 0;
        loop {
            for slot in slots.iter_mut() {
                let exited = match slot.process.as_mut().map(|p| p.try_wait()) {
                    Some(Ok(Some(reason))) => {
                        tracing::debug!(slot = slot.index, reason = %reason, "Worker stopped");
                        true
                    }
                    Some(Err(_)) => true,
                    _ => false,
                };
                if exited {
                    slot.process = None;
                    stopped += 1;
                }
            }
            if slots.iter().all(|slot| slot.process.is_none()) || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(SHUTDOWN_POLL.min(self.shutdown_grace));
        }

        let mut killed = 0;
        for slot in slots.iter_mut() {
            if let Some(mut process) = slot.process.take() {
                tracing::warn!(slot = slot.index, pid = process.id(), "Worker ignored SIGTERM; killing");
                if let Err(e) = process.kill() {
                    tracing::error!(slot = slot.index, error = %e, "SIGKILL failed");
                }
                killed += 1;
            }
        }

        tracing::info!(stopped, killed, "Worker pool stopped");
        ShutdownOutcome::Completed { stopped, killed }
    }

    fn spec_for(&self, slot: usize, core: Option<usize>) -> WorkerSpec {
        WorkerSpec {
            slot,
            core,
            config: self.config.clone(),
            config_path: self.config_path.clone(),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Vec<WorkerSlot<L::Process>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};
    use std::sync::Arc;

    use super::*;

    /// Shared view of one fake process.
    #[derive(Debug, Default)]
    struct FakeState {
        alive: AtomicBool,
        terminated: AtomicUsize,
        killed: AtomicUsize,
        ignores_sigterm: AtomicBool,
    }

    struct FakeProcess {
        pid: u32,
        state: Arc<FakeState>,
    }

    impl WorkerProcess for FakeProcess {
        fn id(&self) -> u32 {
            self.pid
        }

        fn try_wait(&mut self) -> io::Result<Option<TerminationReason>> {
            Ok((!self.state.alive.load(Ordering::SeqCst)).then_some(TerminationReason::Exited(1)))
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.state.terminated.fetch_add(1, Ordering::SeqCst);
            if !self.state.ignores_sigterm.load(Ordering::SeqCst) {
                self.state.alive.store(false, Ordering::SeqCst);
            }
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.state.killed.fetch_add(1, Ordering::SeqCst);
            self.state.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        next_pid: AtomicU32,
        launched: Mutex<Vec<Arc<FakeState>>>,
        fail: AtomicBool,
        ignore_sigterm: bool,
    }

    impl FakeLauncher {
        fn states(&self) -> Vec<Arc<FakeState>> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl WorkerLauncher for Arc<FakeLauncher> {
        type Process = FakeProcess;

        fn launch(&self, _spec: &WorkerSpec) -> io::Result<FakeProcess> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(io::Error::other("spawn refused"));
            }
            let state = Arc::new(FakeState::default());
            state.alive.store(true, Ordering::SeqCst);
            state.ignores_sigterm.store(self.ignore_sigterm, Ordering::SeqCst);
            self.launched.lock().unwrap().push(Arc::clone(&state));
            Ok(FakeProcess {
                pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                state,
            })
        }
    }

    fn supervisor(workers: usize, launcher: Arc<FakeLauncher>) -> WorkerSupervisor<Arc<FakeLauncher>> {
        let mut config = ServerConfig::default();
        config.supervisor.workers = Some(workers);
        WorkerSupervisor::new(launcher, config, None)
            .with_shutdown_grace(Duration::from_millis(100))
            .with_poll_interval(Duration::from_millis(10))
    }

    fn live_count(sup: &WorkerSupervisor<Arc<FakeLauncher>>) -> usize {
        sup.worker_pids().iter().filter(|p| p.is_some()).count()
    }

    #[test]
    fn start_fills_every_slot() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(4, launcher.clone());
        sup.start().unwrap();
        assert_eq!(live_count(&sup), 4);
        assert_eq!(launcher.states().len(), 4);
    }

    #[test]
    fn start_failure_is_fatal() {
        let launcher = Arc::new(FakeLauncher::default());
        launcher.fail.store(true, Ordering::SeqCst);
        let err = supervisor(2, launcher).start().unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { slot: 0, .. }));
    }

    #[test]
    fn pool_size_is_invariant_under_deaths() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(3, launcher.clone());
        sup.start().unwrap();

        for round in 0..25 {
            // Kill one worker (or all of them every fifth round).
            let states = launcher.states();
            let live: Vec<_> = states.iter().filter(|s| s.alive.load(Ordering::SeqCst)).collect();
            if round % 5 == 0 {
                live.iter().for_each(|s| s.alive.store(false, Ordering::SeqCst));
            } else {
                live[round % live.len()].alive.store(false, Ordering::SeqCst);
            }

            sup.reconcile();
            assert_eq!(live_count(&sup), 3, "round {round}");
        }
        assert!(sup.restart_count() >= 25);
    }

    #[test]
    fn clean_exit_is_replaced_like_a_crash() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(1, launcher.clone());
        sup.start().unwrap();
        let before = sup.worker_pids();

        launcher.states()[0].alive.store(false, Ordering::SeqCst);
        assert_eq!(sup.reconcile(), 1);
        assert_ne!(sup.worker_pids(), before);
    }

    #[test]
    fn failed_respawn_is_retried_next_pass() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(2, launcher.clone());
        sup.start().unwrap();

        launcher.states()[1].alive.store(false, Ordering::SeqCst);
        launcher.fail.store(true, Ordering::SeqCst);
        assert_eq!(sup.reconcile(), 0);
        assert_eq!(live_count(&sup), 1);

        launcher.fail.store(false, Ordering::SeqCst);
        assert_eq!(sup.reconcile(), 1);
        assert_eq!(live_count(&sup), 2);
    }

    #[test]
    fn no_respawn_after_terminating() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(2, launcher.clone());
        sup.start().unwrap();
        sup.shutdown(ShutdownSignal::Terminate);

        let launched = launcher.states().len();
        assert_eq!(sup.reconcile(), 0);
        assert_eq!(launcher.states().len(), launched);
        assert!(matches!(sup.start(), Err(SupervisorError::Terminating)));
    }

    #[test]
    fn concurrent_shutdown_tears_down_once() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = Arc::new(supervisor(4, launcher.clone()));
        sup.start().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sup = Arc::clone(&sup);
                let signal = if i % 2 == 0 { ShutdownSignal::Terminate } else { ShutdownSignal::Interrupt };
                std::thread::spawn(move || sup.shutdown(signal))
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, ShutdownOutcome::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
        assert!(outcomes.contains(&ShutdownOutcome::Completed { stopped: 4, killed: 0 }));
        for state in launcher.states() {
            assert_eq!(state.terminated.load(Ordering::SeqCst), 1);
            assert!(!state.alive.load(Ordering::SeqCst));
        }
        assert_eq!(live_count(&sup), 0);
    }

    #[test]
    fn stragglers_are_killed_after_grace() {
        let launcher = Arc::new(FakeLauncher {
            ignore_sigterm: true,
            ..Default::default()
        });
        let sup = supervisor(2, launcher.clone());
        sup.start().unwrap();

        let started = Instant::now();
        let outcome = sup.shutdown(ShutdownSignal::Interrupt);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(outcome, ShutdownOutcome::Completed { stopped: 0, killed: 2 });
        for state in launcher.states() {
            assert_eq!(state.killed.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn monitor_replaces_dead_workers_and_stops_on_shutdown() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = Arc::new(supervisor(2, launcher.clone()));
        sup.start().unwrap();

        let monitor = tokio::spawn({
            let sup = Arc::clone(&sup);
            async move { sup.monitor().await }
        });

        launcher.states()[0].alive.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(live_count(&sup), 2);
        assert!(sup.restart_count() >= 1);

        let sup_for_shutdown = Arc::clone(&sup);
        tokio::task::spawn_blocking(move || sup_for_shutdown.shutdown(ShutdownSignal::Terminate))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
