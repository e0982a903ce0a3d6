//! Prometheus Metrics for cachegate
//!
//! - Strategy outcomes (hit / miss / offline / bypass)
//! - Network failures per strategy
//! - Dynamic partition evictions
//! - Install attempts
//! - Partition sizes
//! - HTTP requests

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    /// Requests served, by strategy and outcome
    pub static ref STRATEGY_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachegate_strategy_requests_total",
        "Requests served by strategy and outcome",
        &["strategy", "outcome"]
    ).unwrap();

    /// Network failures seen by a strategy
    pub static ref NETWORK_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachegate_network_failures_total",
        "Network requests that produced no response",
        &["strategy"]
    ).unwrap();

    /// Entries evicted from a partition
    pub static ref EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachegate_evictions_total",
        "Entries evicted from a size-bounded partition",
        &["partition"]
    ).unwrap();

    /// Install attempts by result
    pub static ref INSTALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cachegate_installs_total",
        "Cache version install attempts",
        &["result"]
    ).unwrap();

    /// Entries per partition
    pub static ref PARTITION_ENTRIES: IntGaugeVec = register_int_gauge_vec!(
        "cachegate_partition_entries",
        "Number of entries per cache partition",
        &["partition"]
    ).unwrap();

    /// Proxy request latency
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "cachegate_http_request_duration_seconds",
        "Proxy request latency in seconds",
        &["method", "outcome"],
        vec![0.0001, 0.001, 0.01, 0.1, 1.0, 10.0]
    ).unwrap();
}

/// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_strategy(strategy: &str, outcome: &str) {
    STRATEGY_TOTAL.with_label_values(&[strategy, outcome]).inc();
}

pub fn record_network_failure(strategy: &str) {
    NETWORK_FAILURES_TOTAL.with_label_values(&[strategy]).inc();
}

pub fn record_evictions(partition: &str, count: usize) {
    EVICTIONS_TOTAL
        .with_label_values(&[partition])
        .inc_by(count as u64);
}

pub fn record_install(result: &str) {
    INSTALLS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_partition_entries(partition: &str, entries: usize) {
    PARTITION_ENTRIES
        .with_label_values(&[partition])
        .set(entries as i64);
}

/// Replace all partition gauges with the current sizes; partitions that
/// no longer exist drop out
pub fn refresh_partition_entries<'a>(partitions: impl IntoIterator<Item = (&'a str, usize)>) {
    PARTITION_ENTRIES.reset();
    for (name, entries) in partitions {
        set_partition_entries(name, entries);
    }
}

pub fn record_http_request(method: &str, outcome: &str, duration_secs: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, outcome])
        .observe(duration_secs);
}
