/// Database driver abstraction
///
/// The reconciliation core only talks to MongoDB through the `Dialer` and
/// `Session` traits. `mongo` implements them on top of the official driver,
/// tests use an in-memory replica set.
pub mod config;
pub mod mongo;
pub mod status;

pub use self::config::{ConfigMember, ReplsetConfig};
pub use self::mongo::MongoDialer;
pub use self::status::{MemberState, ReplsetStatus, StatusMember};
pub use crate::config::SslConfig;

use crate::error::WatchdogResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Read preference applied to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    PrimaryPreferred,
    Nearest,
}

/// Username/password pair authenticated against the admin database
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Everything needed to open a session
#[derive(Debug, Clone, PartialEq)]
pub struct DialInfo {
    /// Seed addresses (host:port)
    pub addrs: Vec<String>,
    /// Replica set name; `None` for direct connections
    pub replset: Option<String>,
    /// Connect to exactly the given address, no topology discovery
    pub direct: bool,
    pub timeout: Duration,
    pub read_preference: ReadPreference,
    pub credentials: Option<Credentials>,
    pub ssl: SslConfig,
}

impl DialInfo {
    /// Dial info for a replica set, primary preferred
    pub fn replset(
        name: &str,
        addrs: Vec<String>,
        timeout: Duration,
        credentials: Option<Credentials>,
        ssl: SslConfig,
    ) -> Self {
        Self {
            addrs,
            replset: Some(name.to_string()),
            direct: false,
            timeout,
            read_preference: ReadPreference::PrimaryPreferred,
            credentials,
            ssl,
        }
    }

    /// Dial info for a single mongod
    pub fn direct(
        addr: String,
        timeout: Duration,
        credentials: Option<Credentials>,
        ssl: SslConfig,
    ) -> Self {
        Self {
            addrs: vec![addr],
            replset: None,
            direct: true,
            timeout,
            read_preference: ReadPreference::Nearest,
            credentials,
            ssl,
        }
    }
}

/// An open session against a replica set or a single mongod
#[async_trait]
pub trait Session: Send + Sync {
    /// Round trip to the server
    async fn ping(&self) -> WatchdogResult<()>;

    /// Load the replica set configuration document
    async fn replset_config(&self) -> WatchdogResult<ReplsetConfig>;

    /// Load the replica set status
    async fn replset_status(&self) -> WatchdogResult<ReplsetStatus>;

    /// Write a replica set configuration; the caller bumps the version
    async fn save_replset_config(&self, config: &ReplsetConfig) -> WatchdogResult<()>;
}

/// Opens sessions
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, info: &DialInfo) -> WatchdogResult<Arc<dyn Session>>;
}
