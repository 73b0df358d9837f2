/// Registry of running watchers, one per replica set name
use super::Watcher;
use crate::config::Config;
use crate::db::Dialer;
use crate::metrics;
use crate::replset::Replset;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

struct WatcherEntry {
    watcher: Arc<Watcher>,
    handle: JoinHandle<()>,
}

pub struct WatcherManager {
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    stop: CancellationToken,
    watchers: RwLock<HashMap<String, WatcherEntry>>,
}

impl WatcherManager {
    /// Watchers are stopped when `stop` is cancelled
    pub fn new(config: Arc<Config>, dialer: Arc<dyn Dialer>, stop: CancellationToken) -> Self {
        Self {
            config,
            dialer,
            stop,
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// Start a watcher for the replica set unless one is registered.
    ///
    /// Returns the registered watcher either way.
    pub async fn watch(&self, replset: Arc<Replset>) -> Arc<Watcher> {
        let mut watchers = self.watchers.write().await;
        if let Some(entry) = watchers.get(replset.name()) {
            return entry.watcher.clone();
        }

        let name = replset.name().to_string();
        let watcher = Arc::new(Watcher::new(
            replset,
            self.config.clone(),
            self.dialer.clone(),
            self.stop.child_token(),
        ));

        let task = watcher.clone();
        let replset_name = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = task.run().await {
                if e.is_cancelled() {
                    info!(replset = %replset_name, "Watcher stopped before connecting");
                } else {
                    error!(replset = %replset_name, error = %e, "Watcher exited with error");
                }
            }
        });

        info!(replset = %name, "Started replset watcher");
        watchers.insert(
            name,
            WatcherEntry {
                watcher: watcher.clone(),
                handle,
            },
        );
        metrics::set_watchers(watchers.len());
        watcher
    }

    pub async fn has_watcher(&self, name: &str) -> bool {
        self.watchers.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Watcher>> {
        self.watchers
            .read()
            .await
            .get(name)
            .map(|entry| entry.watcher.clone())
    }

    /// Names of all registered replica sets, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.watchers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Signal a watcher to exit. Its entry stays registered; poll
    /// `Watcher::is_running` to observe the exit.
    pub async fn stop(&self, name: &str) {
        if let Some(watcher) = self.get(name).await {
            info!(replset = %name, "Stopping replset watcher");
            watcher.stop();
        }
    }

    /// Stop every watcher and wait for their loops to exit
    pub async fn close(&self) {
        let entries: Vec<(String, WatcherEntry)> = self.watchers.write().await.drain().collect();
        for (_, entry) in &entries {
            entry.watcher.stop();
        }
        for (name, entry) in entries {
            if let Err(e) = entry.handle.await {
                error!(replset = %name, error = %e, "Watcher task failed");
            }
        }
        metrics::set_watchers(0);
    }
}
