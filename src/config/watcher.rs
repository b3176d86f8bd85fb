//! Configuration file watcher for hot reload of the filter switches.
//!
//! Only the `[filters]` section is applied while running. Stream settings
//! are attached to each connection at accept time, so a change there is
//! logged and waits for a restart.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{FilterConfig, GatewayConfig, StreamConfig};

/// Watches the configuration file and publishes changed filter settings.
pub struct ConfigWatcher {
    path: PathBuf,
    applied: Reloaded,
    update_tx: mpsc::UnboundedSender<FilterConfig>,
}

/// The settings currently in effect, compared against each reload.
#[derive(Debug, Clone)]
struct Reloaded {
    filters: FilterConfig,
    stream: StreamConfig,
}

impl Reloaded {
    /// Record `config` and return its filter section if that changed.
    fn apply(&mut self, config: GatewayConfig) -> Option<FilterConfig> {
        if config.stream != self.stream {
            tracing::warn!(
                current = self.stream.max_requests_per_connection,
                requested = config.stream.max_requests_per_connection,
                "Stream settings changed; restart to apply"
            );
            self.stream = config.stream;
        }

        if config.filters == self.filters {
            tracing::debug!("Filter settings unchanged");
            return None;
        }
        self.filters = config.filters.clone();
        Some(config.filters)
    }
}

impl ConfigWatcher {
    /// Create a watcher for `path`, starting from the settings in `current`.
    ///
    /// Returns the watcher and a receiver for filter setting updates.
    pub fn new(path: &Path, current: &GatewayConfig) -> (Self, mpsc::UnboundedReceiver<FilterConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let applied = Reloaded {
            filters: current.filters.clone(),
            stream: current.stream.clone(),
        };

        (
            Self {
                path: path.to_path_buf(),
                applied,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for updates to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut applied,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(config) => {
                            if let Some(filters) = applied.apply(config) {
                                tracing::info!(disabled = ?filters.disabled, "Filter settings changed");
                                if update_tx.send(filters).is_err() {
                                    tracing::debug!("Config receiver dropped");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn reloaded(toml: &str) -> Reloaded {
        let config = parse_config(toml).unwrap();
        Reloaded {
            filters: config.filters,
            stream: config.stream,
        }
    }

    #[test]
    fn publishes_only_changed_filter_settings() {
        let mut applied = reloaded("[filters]\ndisabled = [\"audit\"]\n");

        let same = parse_config("[filters]\ndisabled = [\"audit\"]\n").unwrap();
        assert!(applied.apply(same).is_none());

        let changed = parse_config("[filters]\ndisabled = [\"audit\", \"geo\"]\n").unwrap();
        let filters = applied.apply(changed).unwrap();
        assert_eq!(filters.disabled, vec!["audit", "geo"]);
        assert_eq!(applied.filters.disabled, vec!["audit", "geo"]);
    }

    #[test]
    fn stream_changes_are_not_published() {
        let mut applied = reloaded("");
        let changed = parse_config("[stream]\nmax_requests_per_connection = 10\n").unwrap();

        assert!(applied.apply(changed).is_none());
        assert_eq!(applied.stream.max_requests_per_connection, 10);
    }
}
