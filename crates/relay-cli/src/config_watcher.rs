//! Hot reload for `relay.toml`.
//!
//! Watches the config file and, after a debounce window, hands the freshly
//! parsed [`RelayConfig`] to a callback. `relay serve` uses it to broadcast
//! `update_config` to every running tier.

use crate::config::RelayConfig;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use relay_core::{RelayError, RelayResult};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

/// Keeps the file watch alive; dropping it stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Watch `config_path` and call `on_reload` on a background thread after
    /// every burst of modifications, at most once per `debounce`.
    ///
    /// A file that fails to parse is logged and skipped.
    pub fn start<F>(config_path: PathBuf, debounce: Duration, on_reload: F) -> RelayResult<Self>
    where
        F: Fn(RelayConfig) + Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| RelayError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(&config_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                RelayError::Config(format!(
                    "Failed to watch '{}': {e}",
                    config_path.display()
                ))
            })?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let mut last_reload = Instant::now();
            while rx.recv().is_ok() {
                let since = last_reload.elapsed();
                if since < debounce {
                    std::thread::sleep(debounce - since);
                }
                // Fold the rest of the burst into this reload.
                while rx.try_recv().is_ok() {}
                last_reload = Instant::now();

                match RelayConfig::load(&path) {
                    Ok(config) => on_reload(config),
                    Err(e) => tracing::warn!(error = %e, "Config reload skipped"),
                }
            }
            tracing::debug!("Config watcher thread exiting");
        });

        tracing::info!(path = %config_path.display(), "Watching config for changes");
        Ok(Self { _watcher: watcher })
    }
}
