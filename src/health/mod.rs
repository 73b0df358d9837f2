/// Availability probing of individual mongods
pub mod mongodb;

pub use self::mongodb::MongodHealthChecker;

use crate::error::{WatchdogError, WatchdogResult};
use crate::replset::Mongod;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Health status of a mongod
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
            HealthStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a reachable mongod
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe a single mongod
    async fn check_health(&self, mongod: &Mongod) -> HealthStatus;

    /// Delay between probes of the same mongod
    fn check_interval(&self) -> Duration;

    /// Get the timeout for health checks
    fn check_timeout(&self) -> Duration;
}

/// Runs health checkers with timeouts and retries
pub struct HealthCheckManager {
    checker: Box<dyn HealthChecker>,
}

impl HealthCheckManager {
    pub fn new(checker: Box<dyn HealthChecker>) -> Self {
        Self { checker }
    }

    /// Perform health check with timeout
    pub async fn check_mongod_health(&self, mongod: &Mongod) -> HealthStatus {
        match timeout(self.checker.check_timeout(), self.checker.check_health(mongod)).await {
            Ok(status) => status,
            Err(_) => HealthStatus::Timeout,
        }
    }

    /// Probe a mongod until it is healthy, at most `retries` times.
    ///
    /// Waits `check_interval` between probes and gives up early when `stop`
    /// is cancelled.
    pub async fn wait_until_available(
        &self,
        mongod: &Mongod,
        retries: u32,
        stop: &CancellationToken,
    ) -> WatchdogResult<()> {
        let host = mongod.name();
        let mut last = HealthStatus::Unknown;

        for attempt in 1..=retries.max(1) {
            last = self.check_mongod_health(mongod).await;
            if last.is_healthy() {
                tracing::debug!(host = %host, attempt, "Mongod is available");
                return Ok(());
            }
            tracing::debug!(host = %host, attempt, status = %last, "Mongod not available yet");

            if attempt < retries {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        return Err(WatchdogError::cancelled(format!("wait for mongod {}", host)));
                    }
                    _ = tokio::time::sleep(self.checker.check_interval()) => {}
                }
            }
        }

        Err(WatchdogError::connection(format!(
            "mongod {} not available after {} retries: {}",
            host, retries, last
        )))
    }
}
