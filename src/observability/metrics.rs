//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_reloads_total` (counter): documents applied by the watch loop
//! - `config_failures_total` (counter): fetch / parse / apply failures, by `stage`
//! - `config_unknown_keys_total` (counter): keys without a binding
//! - `job_polls_total` (counter): pending-count queries, by `outcome`
//! - `sink_failures_total` (counter): status sink deliveries that failed
//! - `service_reloads_total` (counter): service config reloads, by `outcome`

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_reload() {
    ::metrics::counter!("config_reloads_total").increment(1);
}

pub fn record_failure(stage: &'static str) {
    ::metrics::counter!("config_failures_total", "stage" => stage).increment(1);
}

pub fn record_unknown_key() {
    ::metrics::counter!("config_unknown_keys_total").increment(1);
}

pub fn record_job_poll(outcome: &'static str) {
    ::metrics::counter!("job_polls_total", "outcome" => outcome).increment(1);
}

pub fn record_sink_failure(sink: &'static str) {
    ::metrics::counter!("sink_failures_total", "sink" => sink).increment(1);
}

pub fn record_service_reload(outcome: &'static str) {
    ::metrics::counter!("service_reloads_total", "outcome" => outcome).increment(1);
}
