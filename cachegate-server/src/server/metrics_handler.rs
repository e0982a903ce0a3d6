//! Prometheus Metrics HTTP Handler

use super::handlers::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let partitions = state.registry.storage().info();
    crate::metrics::refresh_partition_entries(
        partitions.iter().map(|p| (p.name.as_str(), p.entries)),
    );

    match crate::metrics::encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Initialize metrics with default values
pub fn init_metrics() {
    // Force initialization of all metrics by accessing them
    let _ = &*crate::metrics::STRATEGY_TOTAL;
    let _ = &*crate::metrics::NETWORK_FAILURES_TOTAL;
    let _ = &*crate::metrics::EVICTIONS_TOTAL;
    let _ = &*crate::metrics::INSTALLS_TOTAL;
    let _ = &*crate::metrics::PARTITION_ENTRIES;
    let _ = &*crate::metrics::HTTP_REQUEST_DURATION;

    tracing::info!("Prometheus metrics initialized (6 metric types registered)");
}
