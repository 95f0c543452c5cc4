//! Configuration file watcher for hot reload.
//!
//! Reloads on file changes (via `notify`) and on SIGHUP. A reload that fails
//! to load or validate keeps the current configuration.

use crate::config::{Config, load_config};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Editors often write a file in several steps; wait this long after the
/// first event and fold everything that arrived meanwhile into one reload.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Callback type for config reload.
pub type ReloadCallback = Box<dyn Fn(Config) + Send + Sync>;

/// Configuration file watcher.
pub struct ConfigWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Invoked with every successfully reloaded config.
    reload_callback: ReloadCallback,
}

impl ConfigWatcher {
    /// Create a new config watcher.
    pub fn new(config_path: PathBuf, reload_callback: ReloadCallback) -> Self {
        Self {
            config_path,
            reload_callback,
        }
    }

    /// Get the path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, mut events) = mpsc::unbounded_channel();
        // Keep the watcher alive for the whole loop; dropping it stops events
        let _watcher = match self.watch(tx) {
            Ok(w) => Some(w),
            Err(e) => {
                error!(error = %e, "file watching unavailable, reload only on SIGHUP");
                None
            }
        };

        #[cfg(unix)]
        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "failed to setup SIGHUP handler");
                    None
                }
            };

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    if !self.should_reload(&event) {
                        continue;
                    }
                    tokio::time::sleep(DEBOUNCE).await;
                    while events.try_recv().is_ok() {}
                    self.try_reload();
                }

                _ = async {
                    #[cfg(unix)]
                    {
                        match sighup.as_mut() {
                            Some(sig) => sig.recv().await,
                            None => std::future::pending::<Option<()>>().await,
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        std::future::pending::<Option<()>>().await
                    }
                } => {
                    info!("received SIGHUP, reloading configuration");
                    self.try_reload();
                }

                _ = shutdown.recv() => {
                    info!("config watcher shutting down");
                    break;
                }
            }
        }
    }

    /// Watch the config file's directory so atomic renames are seen too.
    fn watch(&self, tx: mpsc::UnboundedSender<Event>) -> notify::Result<RecommendedWatcher> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => debug!(error = %e, "file watch error"),
            },
            notify::Config::default(),
        )?;

        let dir = match self.config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    /// Check if this event should trigger a reload.
    fn should_reload(&self, event: &Event) -> bool {
        let is_our_file = event
            .paths
            .iter()
            .any(|p| p.file_name() == self.config_path.file_name());

        is_our_file && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
    }

    /// Load, validate and hand the new config to the callback.
    fn try_reload(&self) {
        match load_config(&self.config_path) {
            Ok(config) => {
                info!(
                    backends = config.backends.len(),
                    algorithm = ?config.balancer.algorithm,
                    "configuration reloaded"
                );
                (self.reload_callback)(config);
            }
            Err(e) => {
                error!(error = %e, "failed to reload config, keeping current");
            }
        }
    }
}
