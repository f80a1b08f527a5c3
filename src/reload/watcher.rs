//! Properties file watcher for live reconfiguration.

use crate::config::{self, ConfigError, Properties};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// Watches a TOML properties file and sends every successfully parsed
/// version down a channel.
pub struct PropertiesFileWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<Properties>,
}

impl PropertiesFileWatcher {
    /// Create a new watcher.
    ///
    /// Returns the watcher and a receiver for reloaded properties.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Properties>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and flatten the file; every property's location is the path.
    pub fn load(path: &Path) -> config::Result<Properties> {
        let location = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            location: location.clone(),
            source,
        })?;
        Properties::from_toml_str(&text, &location)
    }

    /// Start watching on notify's background thread.
    ///
    /// Watching stops when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = %path.display(), "Properties file changed, reloading");
                    match Self::load(&path) {
                        Ok(properties) => {
                            let _ = tx.send(properties);
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to reload properties: {}. Keeping current configuration.",
                                e
                            );
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Properties watcher started");
        Ok(watcher)
    }
}
