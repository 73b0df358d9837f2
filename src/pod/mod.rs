/// Task discovery: the orchestrator's view of running mongod processes
///
/// Two orchestrators are supported, the DC/OS SDK scheduler API and the
/// Kubernetes API. Their tasks are variants of one closed `Task` enum and
/// both clients implement `Source`.
pub mod dcos;
pub mod k8s;

pub use self::dcos::{DcosClient, DcosTask};
pub use self::k8s::{K8sClient, K8sTask};

use crate::config::{Config, SourceConfig};
use crate::error::WatchdogResult;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Environment variable carrying the replica set name of a mongod task
pub const ENV_MONGODB_REPLSET: &str = "MONGODB_REPLSET";
/// Environment variable carrying the port of a mongod task
pub const ENV_MONGODB_PORT: &str = "MONGODB_PORT";
pub const DEFAULT_MONGODB_PORT: u16 = 27017;

/// Kind of process a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Mongod,
    Mongos,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Mongod => "mongod",
            TaskType::Mongos => "mongos",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a task, normalised across orchestrators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unknown,
    Staging,
    Starting,
    Running,
    Killing,
    Finished,
    Failed,
    Killed,
    Lost,
    Error,
}

impl TaskState {
    /// The task is gone and will not come back under this identity
    pub fn is_removed(&self) -> bool {
        matches!(
            self,
            TaskState::Finished
                | TaskState::Failed
                | TaskState::Killed
                | TaskState::Lost
                | TaskState::Error
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Unknown => "UNKNOWN",
            TaskState::Staging => "STAGING",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Killing => "KILLING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
            TaskState::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Network address of a mongod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A task reported by an orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Dcos(DcosTask),
    K8s(K8sTask),
}

impl Task {
    pub fn name(&self) -> &str {
        match self {
            Task::Dcos(task) => task.name(),
            Task::K8s(task) => task.name(),
        }
    }

    pub fn state(&self) -> TaskState {
        match self {
            Task::Dcos(task) => task.state(),
            Task::K8s(task) => task.state(),
        }
    }

    pub fn has_state(&self) -> bool {
        self.state() != TaskState::Unknown
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_removed(&self) -> bool {
        self.state().is_removed()
    }

    pub fn is_task_type(&self, task_type: TaskType) -> bool {
        match self {
            Task::Dcos(task) => task.is_task_type(task_type),
            Task::K8s(task) => task.is_task_type(task_type),
        }
    }

    pub fn mongo_addr(&self) -> WatchdogResult<Addr> {
        match self {
            Task::Dcos(task) => task.mongo_addr(),
            Task::K8s(task) => task.mongo_addr(),
        }
    }

    pub fn mongo_replset_name(&self) -> WatchdogResult<String> {
        match self {
            Task::Dcos(task) => task.mongo_replset_name(),
            Task::K8s(task) => task.mongo_replset_name(),
        }
    }
}

/// A list of pod names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pods(pub Vec<String>);

impl Pods {
    pub fn has_pod(&self, name: &str) -> bool {
        self.0.iter().any(|p| p == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

/// The pod list seen by the most recent discovery cycle
#[derive(Debug, Default)]
pub struct ActivePods {
    pods: RwLock<Pods>,
}

impl ActivePods {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, pods: Pods) {
        *self.pods.write().await = pods;
    }

    pub async fn get(&self) -> Pods {
        self.pods.read().await.clone()
    }

    pub async fn has_pod(&self, name: &str) -> bool {
        self.pods.read().await.has_pod(name)
    }
}

/// An orchestrator API that reports pods and their tasks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Source: Send + Sync {
    /// Short name of the source for logging
    fn name(&self) -> String;

    /// URL pods are listed from
    fn pod_url(&self) -> String;

    async fn list_pods(&self) -> WatchdogResult<Pods>;

    async fn pod_tasks(&self, pod_name: &str) -> WatchdogResult<Vec<Task>>;
}

/// Build the discovery source selected in the configuration
pub fn create_source(config: &Config) -> WatchdogResult<Arc<dyn Source>> {
    let discovery = &config.discovery;
    match &discovery.source {
        SourceConfig::Dcos {
            api_host,
            api_secure,
        } => Ok(Arc::new(DcosClient::new(
            &discovery.framework_name,
            api_host.clone(),
            *api_secure,
            discovery.timeout(),
        )?)),
        SourceConfig::Kubernetes {
            api_url,
            namespace,
            service_name,
            label_selector,
            token_file,
            ca_file,
        } => Ok(Arc::new(K8sClient::new(
            api_url,
            namespace,
            service_name,
            label_selector,
            token_file.as_deref(),
            ca_file.as_deref(),
            discovery.timeout(),
        )?)),
    }
}
