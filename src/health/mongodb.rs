/// Mongod health checker

use super::{HealthChecker, HealthStatus};
use crate::config::MongoDBConfig;
use crate::db::Dialer;
use crate::replset::Mongod;
use std::sync::Arc;
use std::time::Duration;

/// Dials a mongod directly and pings it
pub struct MongodHealthChecker {
    dialer: Arc<dyn Dialer>,
    config: MongoDBConfig,
}

impl MongodHealthChecker {
    pub fn new(dialer: Arc<dyn Dialer>, config: MongoDBConfig) -> Self {
        Self { dialer, config }
    }
}

#[async_trait::async_trait]
impl HealthChecker for MongodHealthChecker {
    async fn check_health(&self, mongod: &Mongod) -> HealthStatus {
        tracing::debug!(host = %mongod.name(), "Checking mongod health");

        let session = match self.dialer.dial(&mongod.dial_info(&self.config)).await {
            Ok(session) => session,
            Err(e) => {
                return HealthStatus::Unhealthy {
                    reason: e.to_string(),
                }
            }
        };
        match session.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        }
    }

    fn check_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    fn check_timeout(&self) -> Duration {
        // dial and ping each get the connect timeout
        self.config.timeout() * 2
    }
}
