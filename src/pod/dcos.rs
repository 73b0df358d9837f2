/// DC/OS SDK scheduler API source

use super::{
    Addr, Pods, Source, Task, TaskState, TaskType, DEFAULT_MONGODB_PORT, ENV_MONGODB_PORT,
    ENV_MONGODB_REPLSET,
};
use crate::error::{WatchdogError, WatchdogResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Version of the DC/OS SDK API
pub const DCOS_API_VERSION: &str = "v1";
/// DNS suffix of DC/OS autoip task names
pub const AUTOIP_DNS_SUFFIX: &str = "autoip.dcos.thisdcos.directory";
const SCHEDULER_HOST_SUFFIX: &str = "marathon.l4lb.thisdcos.directory";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskId {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub variables: Vec<EnvironmentVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub name: String,
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskStatus {
    pub state: String,
}

/// One entry of `GET /v1/pod/<name>/info`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PodTaskInfo {
    pub info: TaskInfo,
    pub status: Option<TaskStatus>,
}

/// A task of a DC/OS SDK pod
#[derive(Debug, Clone, PartialEq)]
pub struct DcosTask {
    framework_name: String,
    data: PodTaskInfo,
}

impl DcosTask {
    pub fn new(framework_name: &str, data: PodTaskInfo) -> Self {
        Self {
            framework_name: framework_name.to_string(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.data.info.name
    }

    pub fn state(&self) -> TaskState {
        let Some(status) = &self.data.status else {
            return TaskState::Unknown;
        };
        match status.state.as_str() {
            "TASK_STAGING" => TaskState::Staging,
            "TASK_STARTING" => TaskState::Starting,
            "TASK_RUNNING" => TaskState::Running,
            "TASK_KILLING" => TaskState::Killing,
            "TASK_FINISHED" => TaskState::Finished,
            "TASK_FAILED" => TaskState::Failed,
            "TASK_KILLED" => TaskState::Killed,
            "TASK_LOST" | "TASK_DROPPED" | "TASK_GONE" | "TASK_GONE_BY_OPERATOR" => TaskState::Lost,
            "TASK_ERROR" => TaskState::Error,
            _ => TaskState::Unknown,
        }
    }

    /// Task names end in `-mongod` / `-mongos`
    pub fn is_task_type(&self, task_type: TaskType) -> bool {
        self.name().ends_with(&format!("-{}", task_type.as_str()))
    }

    fn env_var(&self, name: &str) -> Option<&str> {
        self.data
            .info
            .command
            .environment
            .variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
    }

    pub fn mongo_addr(&self) -> WatchdogResult<Addr> {
        let port = match self.env_var(ENV_MONGODB_PORT) {
            Some(port) => port.parse::<u16>().map_err(|_| {
                WatchdogError::task(self.name(), format!("invalid {}: {}", ENV_MONGODB_PORT, port))
            })?,
            None => DEFAULT_MONGODB_PORT,
        };
        Ok(Addr {
            host: format!("{}.{}.{}", self.name(), self.framework_name, AUTOIP_DNS_SUFFIX),
            port,
        })
    }

    pub fn mongo_replset_name(&self) -> WatchdogResult<String> {
        match self.env_var(ENV_MONGODB_REPLSET) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(WatchdogError::task(
                self.name(),
                format!("missing {} environment variable", ENV_MONGODB_REPLSET),
            )),
        }
    }
}

/// HTTP client for the DC/OS SDK scheduler API
pub struct DcosClient {
    framework_name: String,
    base_url: String,
    client: reqwest::Client,
}

impl DcosClient {
    pub fn new(
        framework_name: &str,
        api_host: Option<String>,
        secure: bool,
        timeout: Duration,
    ) -> WatchdogResult<Self> {
        let host = api_host
            .unwrap_or_else(|| format!("api.{}.{}", framework_name, SCHEDULER_HOST_SUFFIX));
        let scheme = if secure { "https" } else { "http" };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WatchdogError::discovery(e.to_string()))?;

        Ok(Self {
            framework_name: framework_name.to_string(),
            base_url: format!("{}://{}/{}", scheme, host, DCOS_API_VERSION),
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> WatchdogResult<T> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| WatchdogError::discovery(format!("GET {}: {}", url, e)))?
            .error_for_status()
            .map_err(|e| WatchdogError::discovery(format!("GET {}: {}", url, e)))?;

        response
            .json::<T>()
            .await
            .map_err(|e| WatchdogError::discovery(format!("GET {}: {}", url, e)))
    }
}

#[async_trait]
impl Source for DcosClient {
    fn name(&self) -> String {
        "dcos".to_string()
    }

    fn pod_url(&self) -> String {
        format!("{}/pod", self.base_url)
    }

    async fn list_pods(&self) -> WatchdogResult<Pods> {
        let pods: Vec<String> = self.get(&self.pod_url()).await?;
        Ok(Pods(pods))
    }

    async fn pod_tasks(&self, pod_name: &str) -> WatchdogResult<Vec<Task>> {
        let url = format!("{}/{}/info", self.pod_url(), pod_name);
        let tasks: Vec<PodTaskInfo> = self.get(&url).await?;
        Ok(tasks
            .into_iter()
            .map(|data| Task::Dcos(DcosTask::new(&self.framework_name, data)))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn task_json(name: &str, state: Option<&str>, replset: &str, port: u16) -> String {
        let status = match state {
            Some(state) => format!(r#", "status": {{ "state": "{}" }}"#, state),
            None => String::new(),
        };
        format!(
            r#"{{
                "info": {{
                    "name": "{name}",
                    "taskId": {{ "value": "{name}__8e2f" }},
                    "command": {{ "environment": {{ "variables": [
                        {{ "name": "MONGODB_REPLSET", "value": "{replset}" }},
                        {{ "name": "MONGODB_PORT", "value": "{port}" }}
                    ] }} }}
                }}{status}
            }}"#
        )
    }

    pub(crate) fn dcos_task(name: &str, state: Option<&str>, replset: &str, port: u16) -> DcosTask {
        let data: PodTaskInfo = serde_json::from_str(&task_json(name, state, replset, port)).unwrap();
        DcosTask::new("mongo", data)
    }

    #[test]
    fn test_task_fields() {
        let task = dcos_task("rs-0-mongod", Some("TASK_RUNNING"), "rs", 27018);
        assert_eq!(task.name(), "rs-0-mongod");
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.is_task_type(TaskType::Mongod));
        assert!(!task.is_task_type(TaskType::Mongos));
        assert_eq!(task.mongo_replset_name().unwrap(), "rs");

        let addr = task.mongo_addr().unwrap();
        assert_eq!(addr.host, "rs-0-mongod.mongo.autoip.dcos.thisdcos.directory");
        assert_eq!(addr.port, 27018);
    }

    #[test]
    fn test_task_states() {
        assert_eq!(dcos_task("a-mongod", None, "rs", 1).state(), TaskState::Unknown);
        assert_eq!(
            dcos_task("a-mongod", Some("TASK_STAGING"), "rs", 1).state(),
            TaskState::Staging
        );
        assert_eq!(
            dcos_task("a-mongod", Some("TASK_KILLED"), "rs", 1).state(),
            TaskState::Killed
        );
        assert_eq!(
            dcos_task("a-mongod", Some("TASK_GONE"), "rs", 1).state(),
            TaskState::Lost
        );
    }

    #[test]
    fn test_missing_environment() {
        let data: PodTaskInfo =
            serde_json::from_str(r#"{ "info": { "name": "rs-0-mongod" } }"#).unwrap();
        let task = DcosTask::new("mongo", data);
        assert!(task.mongo_replset_name().is_err());
        assert_eq!(task.mongo_addr().unwrap().port, DEFAULT_MONGODB_PORT);
    }

    #[test]
    fn test_client_urls() {
        let client = DcosClient::new("mongo", None, false, Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.pod_url(),
            "http://api.mongo.marathon.l4lb.thisdcos.directory/v1/pod"
        );

        let client = DcosClient::new(
            "mongo",
            Some("scheduler.local:8080".to_string()),
            true,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.pod_url(), "https://scheduler.local:8080/v1/pod");
    }
}
