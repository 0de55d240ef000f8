//! Configuration file watcher for hot reload.
//!
//! Watches the directory holding the file, so editors that save through a
//! rename are seen too. A reload is only forwarded when its mappings differ
//! from the last ones sent; each forwarded reload costs a holding round.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ServerConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ServerConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let ConfigWatcher { path, update_tx } = self;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());
        let mut last_sent: Option<Vec<Value>> = None;

        let watched = path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = ?e, "Watch error");
                        return;
                    }
                };
                if !is_reload(&event, file_name.as_deref()) {
                    return;
                }

                let config = match load_config(&watched) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::error!(path = ?watched, error = %e, "Failed to reload config, keeping current mappings");
                        return;
                    }
                };

                if last_sent.as_ref() == Some(&config.mappings) {
                    tracing::debug!(path = ?watched, "Config touched, mappings unchanged");
                    return;
                }
                tracing::info!(path = ?watched, mappings = config.mappings.len(), "Config change detected");
                last_sent = Some(config.mappings.clone());
                let _ = update_tx.send(config);
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// Whether a filesystem event rewrote the watched file.
fn is_reload(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let rewrote = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    rewrote
        && event
            .paths
            .iter()
            .any(|changed| changed.file_name() == file_name)
}
