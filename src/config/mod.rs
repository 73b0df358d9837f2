/// Configuration management for the replica set watchdog

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Hard limit on replica set members imposed by MongoDB
pub const MAX_REPLSET_MEMBERS: usize = 50;
/// Hard limit on voting members imposed by MongoDB
pub const MAX_VOTING_MEMBERS: usize = 7;
/// A replica set cannot elect a primary without at least one voter
pub const MIN_VOTING_MEMBERS: usize = 1;

/// Main watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Task discovery configuration
    pub discovery: DiscoveryConfig,
    /// MongoDB connection configuration
    pub mongodb: MongoDBConfig,
    /// Replica set membership policy
    pub replset: MembershipConfig,
    /// Prometheus metrics configuration
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Task discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Framework (service) name, used for API hostnames and member tags
    pub framework_name: String,
    /// Discovery poll interval in seconds
    pub poll_interval_sec: u64,
    /// API request timeout in seconds
    pub timeout_sec: u64,
    /// Pods that are never inspected for mongod tasks
    pub ignore_pods: Vec<String>,
    /// Maximum number of pods fetched in parallel
    pub max_concurrent_fetches: usize,
    /// Source specific settings
    pub source: SourceConfig,
}

/// Discovery source selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SourceConfig {
    #[serde(rename = "dcos")]
    Dcos {
        /// Scheduler API host, defaults to the framework's marathon l4lb name
        api_host: Option<String>,
        /// Use https for scheduler API calls
        api_secure: bool,
    },
    #[serde(rename = "k8s")]
    Kubernetes {
        /// Kubernetes API server URL
        api_url: String,
        /// Namespace the mongod pods run in
        namespace: String,
        /// Headless service name used for pod DNS
        service_name: String,
        /// Label selector matching the mongod pods
        label_selector: String,
        /// Service account bearer token file
        token_file: Option<String>,
        /// CA certificate for the API server
        ca_file: Option<String>,
    },
}

/// MongoDB connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDBConfig {
    /// clusterAdmin username
    pub username: String,
    /// clusterAdmin password
    pub password: String,
    /// Replica set poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
    /// SSL/TLS options
    pub ssl: SslConfig,
}

/// SSL/TLS options for MongoDB connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SslConfig {
    pub enabled: bool,
    /// PEM file holding the client certificate and key
    pub pem_key_file: Option<String>,
    /// Certificate authority file
    pub ca_file: Option<String>,
    /// Skip certificate and hostname validation
    pub insecure: bool,
}

/// Replica set membership policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Maximum number of members in a replica set
    pub max_members: usize,
    /// Maximum number of voting members
    pub max_voting_members: usize,
    /// Minimum number of voting members
    pub min_voting_members: usize,
    /// Availability probes against a new mongod before it is added
    pub member_available_retries: u32,
    /// Member tag carrying the framework name
    pub framework_tag: String,
    /// Pods whose mongods are added as hidden, non-voting backup members
    pub backup_pods: Vec<String>,
}

/// Prometheus metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig {
                framework_name: "mongodb".to_string(),
                poll_interval_sec: 30,
                timeout_sec: 5,
                ignore_pods: vec!["admin-0".to_string(), "watchdog-0".to_string()],
                max_concurrent_fetches: 16,
                source: SourceConfig::Dcos {
                    api_host: None,
                    api_secure: false,
                },
            },
            mongodb: MongoDBConfig {
                username: String::new(),
                password: String::new(),
                poll_interval_ms: 5000,
                timeout_ms: 3000,
                ssl: SslConfig::default(),
            },
            replset: MembershipConfig::default(),
            metrics: MetricsConfig {
                enabled: true,
                listen_addr: "0.0.0.0:8080".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            max_members: MAX_REPLSET_MEMBERS,
            max_voting_members: MAX_VOTING_MEMBERS,
            min_voting_members: MIN_VOTING_MEMBERS,
            member_available_retries: 10,
            framework_tag: "dcosFramework".to_string(),
            backup_pods: vec!["backup".to_string()],
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }

    /// Check if a pod is on the ignore list
    pub fn is_ignored(&self, pod_name: &str) -> bool {
        self.ignore_pods.iter().any(|p| p == pod_name)
    }
}

impl MongoDBConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Credentials, if both username and password are set
    pub fn credentials(&self) -> Option<(String, String)> {
        if self.username.is_empty() || self.password.is_empty() {
            return None;
        }
        Some((self.username.clone(), self.password.clone()))
    }
}

impl MembershipConfig {
    /// Check if a pod runs dedicated backup mongods
    pub fn is_backup_pod(&self, pod_name: &str) -> bool {
        self.backup_pods.iter().any(|p| p == pod_name)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate discovery config
        if self.discovery.framework_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "framework_name cannot be empty".to_string(),
            ));
        }

        if self.discovery.poll_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "discovery poll_interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.discovery.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "discovery timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.discovery.max_concurrent_fetches == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }

        if let SourceConfig::Kubernetes {
            api_url,
            namespace,
            service_name,
            ..
        } = &self.discovery.source
        {
            if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid Kubernetes api_url: {}",
                    api_url
                )));
            }
            if namespace.is_empty() || service_name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Kubernetes namespace and service_name cannot be empty".to_string(),
                ));
            }
        }

        // Validate mongodb config
        if self.mongodb.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "mongodb poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.mongodb.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "mongodb timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.mongodb.timeout_ms >= self.mongodb.poll_interval_ms {
            return Err(ConfigError::ValidationError(
                "mongodb timeout_ms must be less than poll_interval_ms".to_string(),
            ));
        }

        // Validate membership policy
        let replset = &self.replset;
        if replset.max_voting_members == 0
            || replset.max_voting_members > MAX_VOTING_MEMBERS
            || replset.max_voting_members % 2 == 0
        {
            return Err(ConfigError::ValidationError(format!(
                "max_voting_members must be an odd number between 1 and {}",
                MAX_VOTING_MEMBERS
            )));
        }

        if replset.min_voting_members == 0 || replset.min_voting_members > replset.max_voting_members
        {
            return Err(ConfigError::ValidationError(
                "min_voting_members must be between 1 and max_voting_members".to_string(),
            ));
        }

        if replset.max_members < replset.max_voting_members || replset.max_members > MAX_REPLSET_MEMBERS
        {
            return Err(ConfigError::ValidationError(format!(
                "max_members must be between max_voting_members and {}",
                MAX_REPLSET_MEMBERS
            )));
        }

        if replset.framework_tag.is_empty() {
            return Err(ConfigError::ValidationError(
                "framework_tag cannot be empty".to_string(),
            ));
        }

        // Validate metrics config
        if self.metrics.enabled {
            self.metrics
                .listen_addr
                .parse::<std::net::SocketAddr>()
                .map_err(|_| {
                    ConfigError::ValidationError(format!(
                        "Invalid metrics listen_addr: {}",
                        self.metrics.listen_addr
                    ))
                })?;
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, source: &str) -> Result<(), ConfigError> {
        let mut config = Config::default();
        config.mongodb.username = "clusteradmin".to_string();
        config.mongodb.password = "changeme".to_string();

        config.discovery.source = match source {
            "dcos" => SourceConfig::Dcos {
                api_host: None,
                api_secure: false,
            },
            "k8s" => SourceConfig::Kubernetes {
                api_url: "https://kubernetes.default.svc".to_string(),
                namespace: "default".to_string(),
                service_name: "mongodb".to_string(),
                label_selector: "app=mongodb".to_string(),
                token_file: Some(
                    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string(),
                ),
                ca_file: Some("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string()),
            },
            _ => {
                return Err(ConfigError::ValidationError(
                    "Source must be 'dcos' or 'k8s'".to_string(),
                ))
            }
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
