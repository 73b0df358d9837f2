/// In-memory replica set used by the reconciliation tests
use crate::db::{
    ConfigMember, DialInfo, Dialer, MemberState, ReplsetConfig, ReplsetStatus, Session,
    StatusMember,
};
use crate::error::{WatchdogError, WatchdogResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct FakeState {
    config: ReplsetConfig,
    down: HashSet<String>,
    unreachable: HashSet<String>,
    dial_failures: usize,
    fail_fetch: bool,
    fail_ping: bool,
    fail_writes: bool,
    dials: usize,
    writes: usize,
}

/// A replica set whose config lives in memory.
///
/// Status is derived from the config: hosts marked down report `DOWN`, the
/// first healthy voting member is `PRIMARY`, the rest `SECONDARY`.
#[derive(Debug, Clone)]
pub struct FakeReplset {
    state: Arc<Mutex<FakeState>>,
    live_sessions: Arc<AtomicUsize>,
}

impl FakeReplset {
    /// A replica set at version 1 whose members get ids in order
    pub fn new(name: &str, hosts: &[&str]) -> Self {
        let mut config = ReplsetConfig::new(name);
        for (id, host) in hosts.iter().enumerate() {
            config.add_member(ConfigMember::new(id as i32, host));
        }
        Self::with_config(config)
    }

    pub fn with_config(config: ReplsetConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                config,
                down: HashSet::new(),
                unreachable: HashSet::new(),
                dial_failures: 0,
                fail_fetch: false,
                fail_ping: false,
                fail_writes: false,
                dials: 0,
                writes: 0,
            })),
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn config(&self) -> ReplsetConfig {
        self.lock().config.clone()
    }

    pub fn set_config(&self, config: ReplsetConfig) {
        self.lock().config = config;
    }

    pub fn set_down(&self, host: &str) {
        self.lock().down.insert(host.to_string());
    }

    /// Direct dials to `host` fail
    pub fn set_unreachable(&self, host: &str) {
        self.lock().unreachable.insert(host.to_string());
    }

    pub fn set_reachable(&self, host: &str) {
        self.lock().unreachable.remove(host);
    }

    /// The next `count` dials fail
    pub fn fail_next_dials(&self, count: usize) {
        self.lock().dial_failures = count;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.lock().fail_fetch = fail;
    }

    /// Pings on every session fail, including the ping after a dial
    pub fn set_fail_ping(&self, fail: bool) {
        self.lock().fail_ping = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn dials(&self) -> usize {
        self.lock().dials
    }

    /// Successful config writes
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Sessions dialed and not yet dropped
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    /// Open a replica set session without going through a `DialInfo`
    pub fn session(&self) -> Arc<dyn Session> {
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeSession {
            replset: self.clone(),
        })
    }
}

#[async_trait]
impl Dialer for FakeReplset {
    async fn dial(&self, info: &DialInfo) -> WatchdogResult<Arc<dyn Session>> {
        {
            let mut state = self.lock();
            state.dials += 1;
            if state.dial_failures > 0 {
                state.dial_failures -= 1;
                return Err(WatchdogError::connection("no reachable servers"));
            }
            if info.direct && info.addrs.iter().any(|a| state.unreachable.contains(a)) {
                return Err(WatchdogError::connection(format!(
                    "{}: connection refused",
                    info.addrs.join(",")
                )));
            }
        }
        Ok(self.session())
    }
}

struct FakeSession {
    replset: FakeReplset,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.replset.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn ping(&self) -> WatchdogResult<()> {
        if self.replset.lock().fail_ping {
            return Err(WatchdogError::connection("ping: connection reset"));
        }
        Ok(())
    }

    async fn replset_config(&self) -> WatchdogResult<ReplsetConfig> {
        let state = self.replset.lock();
        if state.fail_fetch {
            return Err(WatchdogError::connection("replSetGetConfig failed"));
        }
        Ok(state.config.clone())
    }

    async fn replset_status(&self) -> WatchdogResult<ReplsetStatus> {
        let state = self.replset.lock();
        if state.fail_fetch {
            return Err(WatchdogError::connection("replSetGetStatus failed"));
        }

        let mut has_primary = false;
        let members = state
            .config
            .members
            .iter()
            .map(|m| {
                let member_state = if state.down.contains(&m.host) {
                    MemberState::Down
                } else if !has_primary && m.is_voting() {
                    has_primary = true;
                    MemberState::Primary
                } else {
                    MemberState::Secondary
                };
                StatusMember {
                    id: m.id,
                    name: m.host.clone(),
                    health: if member_state == MemberState::Down { 0.0 } else { 1.0 },
                    state: member_state,
                    state_str: member_state.to_string(),
                }
            })
            .collect();

        Ok(ReplsetStatus {
            set: state.config.name.clone(),
            members,
        })
    }

    async fn save_replset_config(&self, config: &ReplsetConfig) -> WatchdogResult<()> {
        let mut state = self.replset.lock();
        if state.fail_writes {
            return Err(WatchdogError::persist_conflict(
                &config.name,
                "replSetReconfig failed",
            ));
        }
        if config.version <= state.config.version {
            return Err(WatchdogError::persist_conflict(
                &config.name,
                format!(
                    "version {} must be greater than {}",
                    config.version, state.config.version
                ),
            ));
        }
        state.config = config.clone();
        state.writes += 1;
        Ok(())
    }
}
