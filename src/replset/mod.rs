/// Replica set registry: the discovered mongods of each replica set
pub mod state;
pub mod voting;

pub use self::state::State;
pub use self::voting::{VotingChange, VotingLimits};

use crate::config::MongoDBConfig;
use crate::db::{Credentials, DialInfo};
use crate::error::WatchdogResult;
use crate::pod::Task;
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::Mutex;

/// A mongod process discovered from an orchestrator task
#[derive(Debug, Clone, PartialEq)]
pub struct Mongod {
    pub host: String,
    pub port: u16,
    pub replset: String,
    pub framework_name: String,
    pub pod_name: String,
    pub backup: bool,
    pub task: Task,
}

impl Mongod {
    /// Resolve a task into a mongod
    pub fn new(task: Task, framework_name: &str, pod_name: &str, backup: bool) -> WatchdogResult<Self> {
        let addr = task.mongo_addr()?;
        let replset = task.mongo_replset_name()?;
        Ok(Self {
            host: addr.host,
            port: addr.port,
            replset,
            framework_name: framework_name.to_string(),
            pod_name: pod_name.to_string(),
            backup,
            task,
        })
    }

    /// Identity of the mongod, `host:port`
    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_backup_node(&self) -> bool {
        self.backup
    }

    /// Dial info for a direct connection to this mongod
    pub fn dial_info(&self, config: &MongoDBConfig) -> DialInfo {
        DialInfo::direct(
            self.name(),
            config.timeout(),
            credentials(config),
            config.ssl.clone(),
        )
    }
}

pub(crate) fn credentials(config: &MongoDBConfig) -> Option<Credentials> {
    config
        .credentials()
        .map(|(username, password)| Credentials { username, password })
}

#[derive(Debug, Default)]
struct Members {
    members: HashMap<String, Mongod>,
    last_updated: Option<SystemTime>,
}

/// The known members of one replica set
#[derive(Debug)]
pub struct Replset {
    name: String,
    inner: Mutex<Members>,
}

impl Replset {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(Members::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace a member by its `host:port` identity
    pub async fn update_member(&self, mongod: Mongod) {
        let mut inner = self.inner.lock().await;
        inner.members.insert(mongod.name(), mongod);
        inner.last_updated = Some(SystemTime::now());
    }

    pub async fn remove_member(&self, mongod: &Mongod) -> Option<Mongod> {
        let mut inner = self.inner.lock().await;
        inner.members.remove(&mongod.name())
    }

    pub async fn get_member(&self, name: &str) -> Option<Mongod> {
        self.inner.lock().await.members.get(name).cloned()
    }

    pub async fn has_member(&self, name: &str) -> bool {
        self.inner.lock().await.members.contains_key(name)
    }

    /// Snapshot of the current members
    pub async fn get_members(&self) -> HashMap<String, Mongod> {
        self.inner.lock().await.members.clone()
    }

    pub async fn last_updated(&self) -> Option<SystemTime> {
        self.inner.lock().await.last_updated
    }

    /// Dial info for the replica set seeded with every known member
    pub async fn dial_info(&self, config: &MongoDBConfig) -> DialInfo {
        let mut addrs: Vec<String> = self.inner.lock().await.members.keys().cloned().collect();
        addrs.sort();
        DialInfo::replset(
            &self.name,
            addrs,
            config.timeout(),
            credentials(config),
            config.ssl.clone(),
        )
    }
}
