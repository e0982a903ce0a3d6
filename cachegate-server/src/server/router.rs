use super::handlers::{self, AppState};
use super::metrics_handler::metrics_handler;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Management
        .route("/_cachegate/health", get(handlers::health_check))
        .route("/_cachegate/caches", get(handlers::list_caches))
        .route("/_cachegate/stats", get(handlers::cache_stats))
        .route("/_cachegate/update", post(handlers::update_worker))
        .route("/_cachegate/trim", post(handlers::trim_dynamic))
        .route("/_cachegate/snapshot", post(handlers::trigger_snapshot))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        // Everything else goes through the cache engine
        .fallback(handlers::proxy_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
