/// Per-replica-set control loop
///
/// A `Watcher` keeps a primary-preferred session to its replica set, polls
/// config and status, and reconciles the config against the mongods the
/// discovery loop registered.
pub mod manager;

pub use self::manager::WatcherManager;

use crate::config::Config;
use crate::db::{ConfigMember, DialInfo, Dialer, MemberState, Session};
use crate::error::{ErrorSeverity, WatchdogError, WatchdogResult};
use crate::health::{HealthCheckManager, MongodHealthChecker};
use crate::replset::{Mongod, Replset, State};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Disconnected,
    Connecting,
    Running,
    Reconnecting,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatcherState::Disconnected => "disconnected",
            WatcherState::Connecting => "connecting",
            WatcherState::Running => "running",
            WatcherState::Reconnecting => "reconnecting",
            WatcherState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

pub struct Watcher {
    replset: Arc<Replset>,
    state: State,
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    health: HealthCheckManager,
    session: Mutex<Option<Arc<dyn Session>>>,
    status: watch::Sender<WatcherState>,
    stop: CancellationToken,
}

impl Watcher {
    pub fn new(
        replset: Arc<Replset>,
        config: Arc<Config>,
        dialer: Arc<dyn Dialer>,
        stop: CancellationToken,
    ) -> Self {
        let checker = MongodHealthChecker::new(dialer.clone(), config.mongodb.clone());
        let (status, _) = watch::channel(WatcherState::Disconnected);
        Self {
            state: State::new(replset.name(), config.replset.clone()),
            health: HealthCheckManager::new(Box::new(checker)),
            replset,
            config,
            dialer,
            session: Mutex::new(None),
            status,
            stop,
        }
    }

    pub fn replset(&self) -> &Arc<Replset> {
        &self.replset
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn watcher_state(&self) -> WatcherState {
        *self.status.borrow()
    }

    /// Receiver notified on every lifecycle change
    pub fn subscribe(&self) -> watch::Receiver<WatcherState> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.watcher_state(),
            WatcherState::Running | WatcherState::Reconnecting
        )
    }

    fn set_state(&self, state: WatcherState) {
        self.status.send_if_modified(|current| {
            // stopped is terminal
            if *current == state || *current == WatcherState::Stopped {
                return false;
            }
            debug!(replset = %self.replset.name(), from = %current, to = %state, "Watcher state change");
            *current = state;
            true
        });
    }

    /// Signal the control loop to exit after its current iteration
    pub fn stop(&self) {
        self.stop.cancel();
        self.set_state(WatcherState::Stopped);
    }

    /// Apply a discovered mongod to the registry.
    ///
    /// Tracked members are dropped once their task is removed and refreshed
    /// while it runs; untracked members are only registered once running.
    pub async fn update_mongod(&self, mongod: Mongod) {
        let name = mongod.name();
        let task = mongod.task.name().to_string();
        let task_state = mongod.task.state();

        if self.replset.has_member(&name).await {
            if mongod.task.is_removed() {
                info!(replset = %self.replset.name(), task = %task, host = %name, state = %task_state, "Removing completed mongod task");
                self.replset.remove_member(&mongod).await;
            } else if mongod.task.is_running() {
                debug!(replset = %self.replset.name(), task = %task, host = %name, state = %task_state, "Updating running mongod task");
                self.replset.update_member(mongod).await;
            }
        } else if mongod.task.has_state() && mongod.task.is_running() {
            info!(replset = %self.replset.name(), task = %task, host = %name, state = %task_state, "Adding new mongod task");
            self.replset.update_member(mongod).await;
        }
    }

    async fn dial(&self, info: &DialInfo) -> WatchdogResult<Arc<dyn Session>> {
        let session = self.dialer.dial(info).await?;
        session.ping().await?;
        Ok(session)
    }

    /// Dial the replica set once per poll interval until a session answers a ping
    async fn connect(&self) -> WatchdogResult<Arc<dyn Session>> {
        let mut ticker = interval(self.config.mongodb.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    return Err(WatchdogError::cancelled(format!(
                        "connect to replset {}",
                        self.replset.name()
                    )));
                }
                _ = ticker.tick() => {}
            }

            // rebuilt every attempt, discovery may have added seeds
            let info = self.replset.dial_info(&self.config.mongodb).await;
            if info.addrs.is_empty() {
                debug!(replset = %self.replset.name(), "No known members to dial yet");
                continue;
            }

            match self.dial(&info).await {
                Ok(session) => {
                    info!(
                        replset = %self.replset.name(),
                        addrs = ?info.addrs,
                        ssl = info.ssl.enabled,
                        "Connected to mongodb replset"
                    );
                    *self.session.lock().await = Some(session.clone());
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        replset = %self.replset.name(),
                        addrs = ?info.addrs,
                        ssl = info.ssl.enabled,
                        error = %e,
                        "Error connecting to mongodb replset"
                    );
                }
            }
        }
    }

    /// The cached session if it still answers, otherwise a fresh one
    async fn get_session(&self) -> WatchdogResult<Arc<dyn Session>> {
        let cached = self.session.lock().await.clone();
        if let Some(session) = cached {
            match session.ping().await {
                Ok(()) => return Ok(session),
                Err(e) => {
                    warn!(replset = %self.replset.name(), error = %e, "Lost replset session, reconnecting");
                }
            }
        }

        self.set_state(WatcherState::Reconnecting);
        *self.session.lock().await = None;
        let session = self.connect().await?;
        self.set_state(WatcherState::Running);
        Ok(session)
    }

    /// Registered mongods missing from the cached config
    async fn mongods_not_in_config(&self) -> Vec<Mongod> {
        let Some(config) = self.state.get_config().await else {
            return Vec::new();
        };
        let mut missing: Vec<Mongod> = self
            .replset
            .get_members()
            .await
            .into_values()
            .filter(|m| !config.has_member(&m.name()))
            .collect();
        missing.sort_by_key(|m| m.name());
        missing
    }

    /// Config members reported down that discovery no longer knows about
    async fn orphaned_config_members(&self) -> Vec<ConfigMember> {
        let (Some(config), Some(status)) =
            (self.state.get_config().await, self.state.get_status().await)
        else {
            return Vec::new();
        };

        let mut orphans = Vec::new();
        for member in status.members_by_state(MemberState::Down) {
            if self.replset.has_member(&member.name).await {
                continue;
            }
            if let Some(config_member) = config.member(&member.name) {
                orphans.push(config_member.clone());
            }
        }
        orphans
    }

    async fn add_missing_members(&self, session: &dyn Session) -> WatchdogResult<()> {
        let retries = self.config.replset.member_available_retries;
        let mut available = Vec::new();

        for mongod in self.mongods_not_in_config().await {
            match self
                .health
                .wait_until_available(&mongod, retries, &self.stop)
                .await
            {
                Ok(()) => {
                    info!(
                        replset = %self.replset.name(),
                        host = %mongod.name(),
                        "Mongod not present in replset config, adding it to replset"
                    );
                    available.push(mongod);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        replset = %self.replset.name(),
                        host = %mongod.name(),
                        retries,
                        error = %e,
                        "Skipping unavailable mongod this cycle"
                    );
                }
            }
        }

        self.state.add_config_members(session, &available).await?;
        Ok(())
    }

    async fn remove_orphaned_members(&self, session: &dyn Session) -> WatchdogResult<()> {
        let orphans = self.orphaned_config_members().await;
        for member in &orphans {
            info!(
                replset = %self.replset.name(),
                host = %member.host,
                "Removing orphaned member from replset config"
            );
        }
        self.state.remove_config_members(session, &orphans).await?;
        Ok(())
    }

    async fn log_replset_state(&self) {
        let Some(status) = self.state.get_status().await else {
            return;
        };

        let mut members: Vec<_> = status.members.iter().collect();
        // primary first
        members.sort_by_key(|m| m.state != MemberState::Primary);

        for member in members {
            match self.replset.get_member(&member.name).await {
                Some(mongod) => info!(
                    replset = %self.replset.name(),
                    host = %member.name,
                    task = %mongod.task.name(),
                    task_state = %mongod.task.state(),
                    "Replset {}", member.state
                ),
                None => info!(
                    replset = %self.replset.name(),
                    host = %member.name,
                    "Replset {}", member.state
                ),
            }
        }
    }

    /// One poll iteration: fetch, add missing members, drop orphans
    pub async fn reconcile(&self, session: &dyn Session) -> WatchdogResult<()> {
        self.state.fetch(session).await?;
        if self.state.get_status().await.is_none() {
            return Ok(());
        }

        if let Err(e) = self.add_missing_members(session).await {
            if e.is_cancelled() {
                return Err(e);
            }
            log_error("add replset members", self.replset.name(), &e);
        }
        if let Err(e) = self.remove_orphaned_members(session).await {
            log_error("remove replset members", self.replset.name(), &e);
        }

        self.log_replset_state().await;
        Ok(())
    }

    /// Run the control loop until stopped
    pub async fn run(self: Arc<Self>) -> WatchdogResult<()> {
        info!(
            replset = %self.replset.name(),
            interval = ?self.config.mongodb.poll_interval(),
            "Watching replset"
        );

        self.set_state(WatcherState::Connecting);
        if let Err(e) = self.connect().await {
            self.set_state(WatcherState::Stopped);
            return Err(e);
        }
        self.set_state(WatcherState::Running);

        let mut ticker = interval(self.config.mongodb.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let session = match self.get_session().await {
                Ok(session) => session,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    log_error("get replset session", self.replset.name(), &e);
                    continue;
                }
            };

            if let Err(e) = self.reconcile(session.as_ref()).await {
                if e.is_cancelled() {
                    break;
                }
                log_error("fetch replset state", self.replset.name(), &e);
            }
        }

        info!(replset = %self.replset.name(), "Stopping watcher for replset");
        *self.session.lock().await = None;
        self.set_state(WatcherState::Stopped);
        Ok(())
    }
}

fn log_error(operation: &str, replset: &str, e: &WatchdogError) {
    match e.severity() {
        ErrorSeverity::Critical | ErrorSeverity::Error => {
            error!(replset = %replset, operation, severity = %e.severity(), error = %e, "Replset operation failed")
        }
        ErrorSeverity::Warning => {
            warn!(replset = %replset, operation, error = %e, "Replset operation failed")
        }
        ErrorSeverity::Info => {
            debug!(replset = %replset, operation, error = %e, "Replset operation interrupted")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replset::tests::{running_mongod, test_mongod};
    use crate::test_utils::FakeReplset;
    use std::time::Duration;

    fn test_config() -> Arc<Config> {
        let mut config = Config::default();
        config.mongodb.poll_interval_ms = 1000;
        config.replset.member_available_retries = 2;
        Arc::new(config)
    }

    fn watcher(fake: &FakeReplset) -> Arc<Watcher> {
        Arc::new(Watcher::new(
            Arc::new(Replset::new("rs")),
            test_config(),
            Arc::new(fake.clone()),
            CancellationToken::new(),
        ))
    }

    async fn register(watcher: &Watcher, indexes: std::ops::Range<usize>) {
        for i in indexes {
            watcher.update_mongod(running_mongod(i)).await;
        }
    }

    #[tokio::test]
    async fn test_update_mongod_transitions() {
        let watcher = watcher(&FakeReplset::new("rs", &[]));
        let replset = watcher.replset().clone();

        // untracked and starting: ignored
        watcher.update_mongod(test_mongod(0, Some("TASK_STARTING"))).await;
        assert!(!replset.has_member("db-0:27017").await);

        // untracked without a state: ignored
        watcher.update_mongod(test_mongod(0, None)).await;
        assert!(!replset.has_member("db-0:27017").await);

        watcher.update_mongod(running_mongod(0)).await;
        assert!(replset.has_member("db-0:27017").await);

        // tracked and killing: kept
        watcher.update_mongod(test_mongod(0, Some("TASK_KILLING"))).await;
        assert!(replset.get_member("db-0:27017").await.unwrap().task.is_running());

        watcher.update_mongod(test_mongod(0, Some("TASK_FINISHED"))).await;
        assert!(!replset.has_member("db-0:27017").await);
    }

    #[tokio::test]
    async fn test_reconcile_adds_discovered_members() {
        let fake = FakeReplset::new("rs", &["db-0:27017"]);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let session = fake.session();
        watcher.reconcile(session.as_ref()).await.unwrap();

        let config = fake.config();
        assert_eq!(config.members.len(), 3);
        assert!(config.members.iter().all(|m| m.votes == 1));
        assert_eq!(config.version, 2);
    }

    #[tokio::test]
    async fn test_reconcile_fourth_member_keeps_odd_voters() {
        let fake = FakeReplset::new("rs", &["db-0:27017", "db-1:27017", "db-2:27017"]);
        let watcher = watcher(&fake);
        register(&watcher, 0..4).await;

        let session = fake.session();
        watcher.reconcile(session.as_ref()).await.unwrap();

        let config = fake.config();
        assert_eq!(config.members.len(), 4);
        assert_eq!(config.voting_members(), 3);
        assert_eq!(config.member("db-3:27017").unwrap().votes, 0);
    }

    #[tokio::test]
    async fn test_reconcile_without_drift_writes_nothing() {
        let fake = FakeReplset::new("rs", &["db-0:27017", "db-1:27017", "db-2:27017"]);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let session = fake.session();
        watcher.reconcile(session.as_ref()).await.unwrap();
        watcher.reconcile(session.as_ref()).await.unwrap();
        assert_eq!(fake.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_skips_unavailable_member() {
        let fake = FakeReplset::new("rs", &["db-0:27017"]);
        fake.set_unreachable("db-2:27017");
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let session = fake.session();
        watcher.reconcile(session.as_ref()).await.unwrap();

        let config = fake.config();
        assert!(config.has_member("db-1:27017"));
        assert!(!config.has_member("db-2:27017"));
        assert!(watcher.replset().has_member("db-2:27017").await);

        fake.set_reachable("db-2:27017");
        watcher.reconcile(session.as_ref()).await.unwrap();
        assert!(fake.config().has_member("db-2:27017"));
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphans() {
        let fake = FakeReplset::new(
            "rs",
            &["db-0:27017", "db-1:27017", "db-2:27017", "db-3:27017", "db-4:27017"],
        );
        fake.set_down("db-4:27017");
        // down but still discovered: kept
        fake.set_down("db-2:27017");
        let watcher = watcher(&fake);
        register(&watcher, 0..4).await;

        let session = fake.session();
        watcher.reconcile(session.as_ref()).await.unwrap();

        let config = fake.config();
        assert!(!config.has_member("db-4:27017"));
        assert!(config.has_member("db-2:27017"));
        assert_eq!(config.voting_members(), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_skips_cycle() {
        let fake = FakeReplset::new("rs", &["db-0:27017"]);
        fake.set_fail_fetch(true);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let session = fake.session();
        let result = watcher.reconcile(session.as_ref()).await;
        assert!(matches!(result, Err(WatchdogError::Connection { .. })));
        assert!(watcher.state().get_status().await.is_none());
        assert_eq!(fake.writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_connects_after_failed_dials() {
        let fake = FakeReplset::new("rs", &["db-0:27017", "db-1:27017", "db-2:27017"]);
        fake.fail_next_dials(5);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let mut states = watcher.subscribe();
        let handle = tokio::spawn(watcher.clone().run());

        states
            .wait_for(|s| *s == WatcherState::Running)
            .await
            .unwrap();
        assert_eq!(fake.dials(), 6);
        assert!(watcher.is_running());
        assert_eq!(fake.live_sessions(), 1);

        watcher.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(watcher.watcher_state(), WatcherState::Stopped);
        assert!(!watcher.is_running());
        assert_eq!(fake.live_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_one_session() {
        let fake = FakeReplset::new("rs", &["db-0:27017", "db-1:27017", "db-2:27017"]);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let mut states = watcher.subscribe();
        let handle = tokio::spawn(watcher.clone().run());
        states
            .wait_for(|s| *s == WatcherState::Running)
            .await
            .unwrap();
        assert_eq!(fake.live_sessions(), 1);

        fake.set_fail_ping(true);
        states
            .wait_for(|s| *s == WatcherState::Reconnecting)
            .await
            .unwrap();
        assert!(watcher.is_running());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(fake.live_sessions() <= 1);
        let dials = fake.dials();
        assert!(dials > 1);

        fake.set_fail_ping(false);
        states
            .wait_for(|s| *s == WatcherState::Running)
            .await
            .unwrap();
        assert!(fake.dials() > dials);
        assert_eq!(fake.live_sessions(), 1);

        watcher.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(fake.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_removed_task_orphaned_only_when_down() {
        let fake = FakeReplset::new("rs", &["db-0:27017", "db-1:27017", "db-2:27017"]);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;
        let session = fake.session();

        watcher
            .update_mongod(test_mongod(2, Some("TASK_FINISHED")))
            .await;
        assert!(!watcher.replset().has_member("db-2:27017").await);

        // still SECONDARY: stays in the config
        watcher.reconcile(session.as_ref()).await.unwrap();
        assert!(fake.config().has_member("db-2:27017"));
        assert_eq!(fake.writes(), 0);

        fake.set_down("db-2:27017");
        watcher.reconcile(session.as_ref()).await.unwrap();
        let config = fake.config();
        assert!(!config.has_member("db-2:27017"));
        assert_eq!(config.members.len(), 2);
        assert_eq!(config.voting_members(), 1);
        assert_eq!(fake.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_connect() {
        let fake = FakeReplset::new("rs", &["db-0:27017"]);
        let watcher = watcher(&fake);

        let handle = tokio::spawn(watcher.clone().run());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(watcher.watcher_state(), WatcherState::Connecting);
        assert_eq!(fake.dials(), 0);

        watcher.stop();
        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(watcher.watcher_state(), WatcherState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reconciles_on_tick() {
        let fake = FakeReplset::new("rs", &["db-0:27017"]);
        let watcher = watcher(&fake);
        register(&watcher, 0..3).await;

        let handle = tokio::spawn(watcher.clone().run());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fake.config().members.len(), 3);

        watcher.stop();
        handle.await.unwrap().unwrap();
    }
}
