/// Discovery loop feeding mongods into the per-replica-set watchers
use crate::config::Config;
use crate::db::Dialer;
use crate::error::WatchdogResult;
use crate::metrics::{self, FetchType};
use crate::pod::{ActivePods, Source, TaskType};
use crate::replset::{Mongod, Replset};
use crate::watcher::WatcherManager;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Watchdog {
    config: Arc<Config>,
    source: Arc<dyn Source>,
    manager: WatcherManager,
    active_pods: ActivePods,
    stop: CancellationToken,
}

impl Watchdog {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn Source>,
        dialer: Arc<dyn Dialer>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            manager: WatcherManager::new(config.clone(), dialer, stop.clone()),
            config,
            source,
            active_pods: ActivePods::new(),
            stop,
        }
    }

    pub fn manager(&self) -> &WatcherManager {
        &self.manager
    }

    pub fn active_pods(&self) -> &ActivePods {
        &self.active_pods
    }

    /// Resolve the mongod tasks of one pod and hand them to their watchers
    async fn fetch_pod_mongods(&self, pod_name: &str) {
        debug!(pod = %pod_name, "Getting tasks for pod");

        let tasks = match self.source.pod_tasks(pod_name).await {
            Ok(tasks) => tasks,
            Err(e) => {
                metrics::record_api_fetch_error(FetchType::GetPodTasks);
                error!(pod = %pod_name, error = %e, "Error fetching pod tasks");
                return;
            }
        };
        metrics::record_api_fetch(FetchType::GetPodTasks);

        let backup = self.config.replset.is_backup_pod(pod_name);
        for task in tasks {
            if !task.is_task_type(TaskType::Mongod) {
                debug!(task = %task.name(), "Skipping non-mongod task");
                continue;
            }

            let task_name = task.name().to_string();
            let mongod = match Mongod::new(task, &self.config.discovery.framework_name, pod_name, backup) {
                Ok(mongod) => mongod,
                Err(e) => {
                    warn!(pod = %pod_name, task = %task_name, error = %e, "Error creating mongod");
                    continue;
                }
            };

            let watcher = match self.manager.get(&mongod.replset).await {
                Some(watcher) => watcher,
                None => {
                    self.manager
                        .watch(Arc::new(Replset::new(&mongod.replset)))
                        .await
                }
            };
            watcher.update_mongod(mongod).await;
        }
    }

    /// One discovery cycle: list pods, then fetch their tasks in parallel
    pub async fn fetch_pods(&self) -> WatchdogResult<()> {
        debug!(url = %self.source.pod_url(), "Getting pods from source");

        let pods = match self.source.list_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                metrics::record_api_fetch_error(FetchType::GetPods);
                return Err(e);
            }
        };
        metrics::record_api_fetch(FetchType::GetPods);

        if pods.is_empty() {
            debug!("Found no pods from source");
        }
        self.active_pods.set(pods.clone()).await;

        let discovery = &self.config.discovery;
        let pod_names: Vec<String> = pods
            .iter()
            .filter(|name| {
                let ignored = discovery.is_ignored(name);
                if ignored {
                    debug!(pod = %name, "Pod matches ignore list, skipping");
                }
                !ignored
            })
            .cloned()
            .collect();

        stream::iter(pod_names)
            .for_each_concurrent(discovery.max_concurrent_fetches, |pod_name| async move {
                self.fetch_pod_mongods(&pod_name).await;
            })
            .await;

        debug!(pods = pods.len(), "Completed all pod fetchers");
        Ok(())
    }

    /// Poll the discovery source until stopped.
    ///
    /// A failure of the first cycle is returned, later failures are logged
    /// and retried on the next tick.
    pub async fn run(&self) -> WatchdogResult<()> {
        info!(
            framework = %self.config.discovery.framework_name,
            source = %self.source.name(),
            version = env!("CARGO_PKG_VERSION"),
            "Starting watchdog"
        );

        let mut ticker = interval(self.config.discovery.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut first = true;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.fetch_pods().await {
                Ok(()) => {}
                Err(e) if first => {
                    self.manager.close().await;
                    return Err(e);
                }
                Err(e) => {
                    error!(url = %self.source.pod_url(), error = %e, "Error fetching pod list");
                }
            }
            first = false;
        }

        info!("Stopping watchers");
        self.manager.close().await;
        Ok(())
    }
}
