/// `Dialer` / `Session` implementation on top of the official MongoDB driver

use super::{DialInfo, Dialer, ReadPreference, ReplsetConfig, ReplsetStatus, Session};
use crate::error::{WatchdogError, WatchdogResult};
use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{
    ClientOptions, Credential, ReadPreference as DriverReadPreference, ReadPreferenceOptions,
    SelectionCriteria, ServerAddress, Tls, TlsOptions,
};
use mongodb::Client;
use std::path::PathBuf;
use std::sync::Arc;

const APP_NAME: &str = "replset-watchdog";
const AUTH_SOURCE: &str = "admin";

// Server error codes
const UNAUTHORIZED: i32 = 13;
const INVALID_REPLICA_SET_CONFIG: i32 = 93;
const NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE: i32 = 103;
const CONFLICTING_OPERATION_IN_PROGRESS: i32 = 117;
const CONFIGURATION_IN_PROGRESS: i32 = 109;

/// Dials MongoDB with the official driver
#[derive(Debug, Clone, Default)]
pub struct MongoDialer;

impl MongoDialer {
    pub fn new() -> Self {
        Self
    }

    fn client_options(info: &DialInfo) -> WatchdogResult<ClientOptions> {
        let hosts = info
            .addrs
            .iter()
            .map(ServerAddress::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| connection_error(info.replset.as_deref(), e))?;

        let mut options = ClientOptions::default();
        options.hosts = hosts;
        options.app_name = Some(APP_NAME.to_string());
        options.repl_set_name = info.replset.clone();
        options.direct_connection = Some(info.direct);
        options.connect_timeout = Some(info.timeout);
        options.server_selection_timeout = Some(info.timeout);
        options.selection_criteria = Some(selection_criteria(info.read_preference));

        if let Some(credentials) = &info.credentials {
            let mut credential = Credential::default();
            credential.username = Some(credentials.username.clone());
            credential.password = Some(credentials.password.clone());
            credential.source = Some(AUTH_SOURCE.to_string());
            options.credential = Some(credential);
        }

        if info.ssl.enabled {
            let mut tls = TlsOptions::default();
            tls.allow_invalid_certificates = Some(info.ssl.insecure);
            tls.ca_file_path = info.ssl.ca_file.as_ref().map(PathBuf::from);
            tls.cert_key_file_path = info.ssl.pem_key_file.as_ref().map(PathBuf::from);
            options.tls = Some(Tls::Enabled(tls));
        }

        Ok(options)
    }
}

#[async_trait]
impl Dialer for MongoDialer {
    async fn dial(&self, info: &DialInfo) -> WatchdogResult<Arc<dyn Session>> {
        let options = Self::client_options(info)?;
        let client = Client::with_options(options)
            .map_err(|e| connection_error(info.replset.as_deref(), e))?;

        tracing::debug!(
            addrs = ?info.addrs,
            replset = info.replset.as_deref().unwrap_or(""),
            direct = info.direct,
            ssl = info.ssl.enabled,
            "Opened MongoDB client"
        );

        Ok(Arc::new(MongoSession {
            client,
            replset: info.replset.clone(),
        }))
    }
}

fn selection_criteria(read_preference: ReadPreference) -> SelectionCriteria {
    let read_preference = match read_preference {
        ReadPreference::Primary => DriverReadPreference::Primary,
        ReadPreference::PrimaryPreferred => DriverReadPreference::PrimaryPreferred {
            options: ReadPreferenceOptions::default(),
        },
        ReadPreference::Nearest => DriverReadPreference::Nearest {
            options: ReadPreferenceOptions::default(),
        },
    };
    SelectionCriteria::ReadPreference(read_preference)
}

fn command_code(err: &MongoError) -> Option<i32> {
    match &*err.kind {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn connection_error(replset: Option<&str>, err: impl std::fmt::Display) -> WatchdogError {
    WatchdogError::Connection {
        replset: replset.map(str::to_string),
        message: err.to_string(),
    }
}

/// A driver client bound to one replica set or one mongod
pub struct MongoSession {
    client: Client,
    replset: Option<String>,
}

impl MongoSession {
    async fn admin_command(
        &self,
        command: Document,
        criteria: Option<SelectionCriteria>,
    ) -> WatchdogResult<Document> {
        self.client
            .database("admin")
            .run_command(command, criteria)
            .await
            .map_err(|e| self.map_error(e))
    }

    fn map_error(&self, err: MongoError) -> WatchdogError {
        match command_code(&err) {
            Some(UNAUTHORIZED) => WatchdogError::not_authorized(err.to_string()),
            _ => connection_error(self.replset.as_deref(), err),
        }
    }

    fn replset_name(&self) -> &str {
        self.replset.as_deref().unwrap_or("")
    }
}

#[async_trait]
impl Session for MongoSession {
    async fn ping(&self) -> WatchdogResult<()> {
        self.admin_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    async fn replset_config(&self) -> WatchdogResult<ReplsetConfig> {
        let reply = self
            .admin_command(doc! { "replSetGetConfig": 1 }, None)
            .await?;
        let config = reply
            .get_document("config")
            .map_err(|e| connection_error(self.replset.as_deref(), e))?;
        bson::from_document(config.clone()).map_err(|e| connection_error(self.replset.as_deref(), e))
    }

    async fn replset_status(&self) -> WatchdogResult<ReplsetStatus> {
        let reply = self
            .admin_command(doc! { "replSetGetStatus": 1 }, None)
            .await?;
        bson::from_document(reply).map_err(|e| connection_error(self.replset.as_deref(), e))
    }

    async fn save_replset_config(&self, config: &ReplsetConfig) -> WatchdogResult<()> {
        let document = bson::to_document(config)
            .map_err(|e| WatchdogError::persist_conflict(self.replset_name(), e.to_string()))?;

        let result = self
            .client
            .database("admin")
            .run_command(
                doc! { "replSetReconfig": document },
                Some(SelectionCriteria::ReadPreference(DriverReadPreference::Primary)),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match command_code(&err) {
                Some(UNAUTHORIZED) => Err(WatchdogError::not_authorized(err.to_string())),
                Some(
                    INVALID_REPLICA_SET_CONFIG
                    | NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE
                    | CONFIGURATION_IN_PROGRESS
                    | CONFLICTING_OPERATION_IN_PROGRESS,
                ) => Err(WatchdogError::persist_conflict(
                    self.replset_name(),
                    err.to_string(),
                )),
                _ => Err(self.map_error(err)),
            },
        }
    }
}
