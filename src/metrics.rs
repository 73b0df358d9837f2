/// Prometheus metrics for discovery and reconciliation
use crate::config::MetricsConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub const API_FETCHES_TOTAL: &str = "watchdog_api_fetches_total";
pub const API_FETCH_ERRORS_TOTAL: &str = "watchdog_api_fetch_errors_total";
pub const REPLSET_CONFIG_WRITES_TOTAL: &str = "watchdog_replset_config_writes_total";
pub const REPLSET_WATCHERS: &str = "watchdog_replset_watchers";

/// Kind of discovery API call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    GetPods,
    GetPodTasks,
}

impl FetchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchType::GetPods => "get_pods",
            FetchType::GetPodTasks => "get_pod_tasks",
        }
    }
}

/// Install the Prometheus recorder and its HTTP listener
pub fn install(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config.listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(listen_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

pub fn record_api_fetch(fetch_type: FetchType) {
    metrics::counter!(API_FETCHES_TOTAL, "type" => fetch_type.as_str()).increment(1);
}

pub fn record_api_fetch_error(fetch_type: FetchType) {
    metrics::counter!(API_FETCH_ERRORS_TOTAL, "type" => fetch_type.as_str()).increment(1);
}

pub fn record_config_write(replset: &str) {
    metrics::counter!(REPLSET_CONFIG_WRITES_TOTAL, "replset" => replset.to_string()).increment(1);
}

pub fn set_watchers(count: usize) {
    metrics::gauge!(REPLSET_WATCHERS).set(count as f64);
}
