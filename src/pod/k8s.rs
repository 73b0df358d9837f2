/// Kubernetes API source
use super::{
    Addr, Pods, Source, Task, TaskState, TaskType, DEFAULT_MONGODB_PORT, ENV_MONGODB_REPLSET,
};
use crate::error::{WatchdogError, WatchdogResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Name of the container port mongod listens on
pub const MONGODB_PORT_NAME: &str = "mongodb";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub deletion_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PodStatus {
    pub phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PodList {
    pub items: Vec<Pod>,
}

/// A mongod/mongos pod of a StatefulSet
#[derive(Debug, Clone, PartialEq)]
pub struct K8sTask {
    namespace: String,
    service_name: String,
    pod: Pod,
}

impl K8sTask {
    pub fn new(namespace: &str, service_name: &str, pod: Pod) -> Self {
        Self {
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            pod,
        }
    }

    pub fn name(&self) -> &str {
        &self.pod.metadata.name
    }

    pub fn state(&self) -> TaskState {
        if self.pod.metadata.deletion_timestamp.is_some() {
            return TaskState::Killing;
        }
        match self.pod.status.phase.as_deref() {
            Some("Pending") => TaskState::Starting,
            Some("Running") => TaskState::Running,
            Some("Succeeded") => TaskState::Finished,
            Some("Failed") => TaskState::Failed,
            _ => TaskState::Unknown,
        }
    }

    fn container(&self, task_type: TaskType) -> Option<&Container> {
        self.pod
            .spec
            .containers
            .iter()
            .find(|c| c.name == task_type.as_str())
    }

    pub fn is_task_type(&self, task_type: TaskType) -> bool {
        self.container(task_type).is_some()
    }

    pub fn mongo_addr(&self) -> WatchdogResult<Addr> {
        let container = self
            .container(TaskType::Mongod)
            .ok_or_else(|| WatchdogError::task(self.name(), "pod has no mongod container"))?;
        let port = container
            .ports
            .iter()
            .find(|p| p.name.as_deref() == Some(MONGODB_PORT_NAME))
            .or_else(|| container.ports.first())
            .map(|p| p.container_port)
            .unwrap_or(DEFAULT_MONGODB_PORT);

        Ok(Addr {
            host: format!(
                "{}.{}.{}.svc.cluster.local",
                self.name(),
                self.service_name,
                self.namespace
            ),
            port,
        })
    }

    pub fn mongo_replset_name(&self) -> WatchdogResult<String> {
        self.container(TaskType::Mongod)
            .and_then(|c| c.env.iter().find(|e| e.name == ENV_MONGODB_REPLSET))
            .and_then(|e| e.value.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                WatchdogError::task(
                    self.name(),
                    format!("missing {} environment variable", ENV_MONGODB_REPLSET),
                )
            })
    }
}

/// HTTP client for the Kubernetes core API
pub struct K8sClient {
    api_url: String,
    namespace: String,
    service_name: String,
    label_selector: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl K8sClient {
    pub fn new(
        api_url: &str,
        namespace: &str,
        service_name: &str,
        label_selector: &str,
        token_file: Option<&str>,
        ca_file: Option<&str>,
        timeout: Duration,
    ) -> WatchdogResult<Self> {
        let token = match token_file {
            Some(path) => Some(
                fs::read_to_string(path)
                    .map_err(|e| WatchdogError::discovery(format!("read token {}: {}", path, e)))?
                    .trim()
                    .to_string(),
            ),
            None => None,
        };

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(path) = ca_file {
            let pem = fs::read(path)
                .map_err(|e| WatchdogError::discovery(format!("read CA {}: {}", path, e)))?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| WatchdogError::discovery(format!("parse CA {}: {}", path, e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        let client = builder
            .build()
            .map_err(|e| WatchdogError::discovery(e.to_string()))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            label_selector: label_selector.to_string(),
            token,
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> WatchdogResult<T> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
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
impl Source for K8sClient {
    fn name(&self) -> String {
        "k8s".to_string()
    }

    fn pod_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.api_url, self.namespace)
    }

    async fn list_pods(&self) -> WatchdogResult<Pods> {
        let mut query = Vec::new();
        if !self.label_selector.is_empty() {
            query.push(("labelSelector", self.label_selector.as_str()));
        }
        let list: PodList = self.get(&self.pod_url(), &query).await?;
        Ok(Pods(list.items.into_iter().map(|p| p.metadata.name).collect()))
    }

    async fn pod_tasks(&self, pod_name: &str) -> WatchdogResult<Vec<Task>> {
        let url = format!("{}/{}", self.pod_url(), pod_name);
        let pod: Pod = self.get(&url, &[]).await?;
        Ok(vec![Task::K8s(K8sTask::new(
            &self.namespace,
            &self.service_name,
            pod,
        ))])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn k8s_task(name: &str, phase: &str, deleting: bool) -> K8sTask {
        let deletion = if deleting {
            r#", "deletionTimestamp": "2024-01-01T00:00:00Z""#
        } else {
            ""
        };
        let json = format!(
            r#"{{
                "metadata": {{ "name": "{name}"{deletion} }},
                "spec": {{ "containers": [{{
                    "name": "mongod",
                    "ports": [{{ "name": "metrics", "containerPort": 9216 }}, {{ "name": "mongodb", "containerPort": 27018 }}],
                    "env": [{{ "name": "MONGODB_REPLSET", "value": "rs0" }}]
                }}] }},
                "status": {{ "phase": "{phase}" }}
            }}"#
        );
        let pod: Pod = serde_json::from_str(&json).unwrap();
        K8sTask::new("db", "mongodb", pod)
    }

    #[test]
    fn test_task_fields() {
        let task = k8s_task("mongodb-rs0-0", "Running", false);
        assert_eq!(task.name(), "mongodb-rs0-0");
        assert_eq!(task.state(), TaskState::Running);
        assert!(task.is_task_type(TaskType::Mongod));
        assert!(!task.is_task_type(TaskType::Mongos));
        assert_eq!(task.mongo_replset_name().unwrap(), "rs0");

        let addr = task.mongo_addr().unwrap();
        assert_eq!(addr.host, "mongodb-rs0-0.mongodb.db.svc.cluster.local");
        assert_eq!(addr.port, 27018);
    }

    #[test]
    fn test_task_states() {
        assert_eq!(k8s_task("p", "Pending", false).state(), TaskState::Starting);
        assert_eq!(k8s_task("p", "Succeeded", false).state(), TaskState::Finished);
        assert_eq!(k8s_task("p", "Failed", false).state(), TaskState::Failed);
        assert_eq!(k8s_task("p", "Running", true).state(), TaskState::Killing);
        assert_eq!(k8s_task("p", "Weird", false).state(), TaskState::Unknown);
    }

    #[test]
    fn test_pod_without_mongod_container() {
        let pod: Pod = serde_json::from_str(
            r#"{ "metadata": { "name": "exporter-0" }, "spec": { "containers": [{ "name": "exporter" }] } }"#,
        )
        .unwrap();
        let task = K8sTask::new("db", "mongodb", pod);
        assert!(!task.is_task_type(TaskType::Mongod));
        assert!(task.mongo_addr().is_err());
        assert!(task.mongo_replset_name().is_err());
        assert_eq!(task.state(), TaskState::Unknown);
    }

    #[test]
    fn test_client_pod_url() {
        let client = K8sClient::new(
            "https://kubernetes.default.svc/",
            "db",
            "mongodb",
            "app=mongodb",
            None,
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.pod_url(),
            "https://kubernetes.default.svc/api/v1/namespaces/db/pods"
        );
        assert_eq!(client.name(), "k8s");
    }

    #[test]
    fn test_client_missing_token_file() {
        let result = K8sClient::new(
            "https://kubernetes.default.svc",
            "db",
            "mongodb",
            "",
            Some("/nonexistent/token"),
            None,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(WatchdogError::Discovery { .. })));
    }
}
