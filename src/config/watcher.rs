//! Configuration file watcher driving route-table reloads.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::ServerConfig;

/// Watches the configuration file and forwards each distinct, valid
/// revision to a channel.
pub struct ConfigWatcher {
    path: PathBuf,
    current: ServerConfig,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, seeded with the config already in use.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(
        path: &Path,
        current: ServerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        // Editors emit several events per save; only forward real changes.
        let last = Arc::new(Mutex::new(self.current));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match read_revision(&path) {
                        Ok(None) => {
                            tracing::debug!(path = ?path, "Config file empty mid-write; waiting");
                        }
                        Ok(Some(new_config)) => {
                            let Ok(mut last) = last.lock() else { return };
                            if *last == new_config {
                                return;
                            }
                            tracing::info!(path = ?path, "Config file changed");
                            *last = new_config.clone();
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                "Failed to reload config. Keeping current configuration."
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::debug!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Load the file as it is now. `Ok(None)` while it is empty: a writer that
/// truncates first produces that state between its two events.
fn read_revision(path: &Path) -> Result<Option<ServerConfig>, ConfigError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    parse_config(&content).map(Some)
}
