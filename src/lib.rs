/// replset-watchdog - keeps MongoDB replica set configs in step with orchestrator tasks
///
/// The watchdog polls a discovery source (the DC/OS SDK scheduler API or the
/// Kubernetes API) for mongod tasks, registers them per replica set, and runs
/// one watcher per replica set that adds new mongods to the replica set
/// config, removes members whose tasks are gone, and keeps the number of
/// voting members odd.
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod metrics;
pub mod pod;
pub mod replset;
pub mod watchdog;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::config::Config;
pub use crate::error::{WatchdogError, WatchdogResult};
pub use crate::watchdog::Watchdog;
