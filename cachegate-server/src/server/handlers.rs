use crate::core::fetcher::is_hop_by_hop;
use crate::core::{
    CacheConfig, CacheGateError, Classifier, FetchRequest, Served, WorkerRegistry,
};
use crate::metrics;
use crate::persistence::SnapshotManager;
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, Response as HttpResponse, StatusCode},
    response::{IntoResponse, Response as AxumResponse},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    /// Version installed by `POST /_cachegate/update`
    pub cache_config: Arc<CacheConfig>,
    pub snapshot: Option<Arc<SnapshotManager>>,
}

#[derive(Debug, Serialize)]
pub struct WorkerInfo {
    pub id: u64,
    pub version: String,
    pub state: String,
    pub static_partition: String,
    pub dynamic_partition: String,
    pub dynamic_max_items: usize,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub worker: WorkerInfo,
}

fn worker_info(registry: &WorkerRegistry) -> Option<WorkerInfo> {
    registry.active().map(|w| WorkerInfo {
        id: w.id(),
        version: w.version().to_string(),
        state: w.state().as_str().to_string(),
        static_partition: w.config().static_name.clone(),
        dynamic_partition: w.config().dynamic_name.clone(),
        dynamic_max_items: w.config().dynamic_max_items,
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "cachegate",
        "version": env!("CARGO_PKG_VERSION"),
        "origin": state.registry.origin().as_str(),
        "worker": worker_info(&state.registry),
    }))
}

/// GET /_cachegate/caches - partitions and their sizes
pub async fn list_caches(State(state): State<AppState>) -> Json<serde_json::Value> {
    let partitions = state.registry.storage().info();
    metrics::refresh_partition_entries(partitions.iter().map(|p| (p.name.as_str(), p.entries)));

    Json(json!({
        "partitions": partitions,
        "total_entries": state.registry.storage().total_entries(),
    }))
}

/// GET /_cachegate/stats - counters of the active worker
pub async fn cache_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, CacheGateError> {
    let worker = state
        .registry
        .active()
        .ok_or(CacheGateError::NoActiveWorker)?;
    let stats = worker.stats();

    Ok(Json(json!({
        "version": worker.version(),
        "hit_rate": stats.hit_rate(),
        "stats": stats,
    })))
}

/// POST /_cachegate/update - install and activate the configured version
pub async fn update_worker(
    State(state): State<AppState>,
) -> Result<Json<UpdateResponse>, CacheGateError> {
    info!("REST UPDATE version={}", state.cache_config.version());

    state
        .registry
        .register((*state.cache_config).clone())
        .await?;

    save_snapshot(&state).await;

    let worker = worker_info(&state.registry).ok_or(CacheGateError::NoActiveWorker)?;
    Ok(Json(UpdateResponse {
        success: true,
        worker,
    }))
}

/// POST /_cachegate/trim - trim the dynamic partition to its cap
pub async fn trim_dynamic(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, CacheGateError> {
    let worker = state
        .registry
        .active()
        .ok_or(CacheGateError::NoActiveWorker)?;
    let evicted = worker.trim_dynamic();
    debug!("REST TRIM evicted={}", evicted);

    Ok(Json(json!({
        "partition": worker.config().dynamic_name,
        "evicted": evicted,
    })))
}

/// POST /_cachegate/snapshot - write the cache store to disk now
pub async fn trigger_snapshot(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, CacheGateError> {
    let snapshot = state
        .snapshot
        .as_ref()
        .ok_or_else(|| CacheGateError::InvalidRequest("Persistence is disabled".to_string()))?;

    let stats = snapshot.save(state.registry.storage()).await?;
    Ok(Json(json!({
        "success": true,
        "snapshot": stats,
    })))
}

async fn save_snapshot(state: &AppState) {
    if let Some(ref snapshot) = state.snapshot {
        if let Err(e) = snapshot.save(state.registry.storage()).await {
            error!("Failed to write snapshot: {}", e);
        }
    }
}

/// Fallback handler: every other request goes through the cache engine
pub async fn proxy_request(State(state): State<AppState>, request: Request) -> AxumResponse {
    let started = Instant::now();

    let worker = state.registry.active();
    let classifier = worker.as_ref().map(|w| w.dispatcher().classifier());
    let fetch = match to_fetch_request(state.registry.origin(), classifier, request).await {
        Ok(fetch) => fetch,
        Err(e) => return e.into_response(),
    };
    let method = fetch.method.to_string();

    match state.registry.handle(&fetch).await {
        Ok(served) => {
            metrics::record_http_request(
                &method,
                served.outcome.as_str(),
                started.elapsed().as_secs_f64(),
            );
            served_response(served)
        }
        Err(e) => {
            warn!("Proxy {} {} failed: {}", method, fetch.url, e);
            metrics::record_http_request(&method, "error", started.elapsed().as_secs_f64());
            e.into_response()
        }
    }
}

/// Convert an incoming request into an upstream request.
///
/// Origin-form targets (`/path?q`) are resolved against the upstream
/// origin. Absolute-form targets (`https://host/path`) are kept as-is, but
/// only for the upstream origin itself or an external origin the
/// classifier knows; anything else is rejected.
pub async fn to_fetch_request(
    origin: &Url,
    classifier: Option<&Classifier>,
    request: Request,
) -> Result<FetchRequest, CacheGateError> {
    let (parts, body) = request.into_parts();

    let url = if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        let target = parts.uri.to_string();
        let parsed = Url::parse(&target).map_err(|e| {
            CacheGateError::InvalidRequest(format!("bad target '{}': {}", target, e))
        })?;
        let same_origin = parsed.origin() == origin.origin();
        let external = classifier.is_some_and(|c| c.is_external(parsed.as_str()));
        if !same_origin && !external {
            return Err(CacheGateError::InvalidRequest(format!(
                "target '{}' is not proxied",
                target
            )));
        }
        parsed.to_string()
    } else {
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        origin
            .join(target)
            .map_err(|e| {
                CacheGateError::InvalidRequest(format!("bad target '{}': {}", target, e))
            })?
            .to_string()
    };

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| CacheGateError::InvalidRequest(format!("failed to read body: {}", e)))?;

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(FetchRequest {
        method: parts.method,
        url,
        headers,
        body,
    })
}

/// Build the client response, tagged with the strategy and outcome
pub fn served_response(served: Served) -> AxumResponse {
    let status = match StatusCode::from_u16(served.response.status) {
        Ok(status) => status,
        Err(_) => {
            return CacheGateError::UpstreamStatus {
                status: served.response.status,
                url: String::new(),
            }
            .into_response();
        }
    };

    let mut builder = HttpResponse::builder().status(status);
    for (name, value) in &served.response.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder = builder
        .header(
            "x-cache-strategy",
            HeaderValue::from_static(served.strategy.as_str()),
        )
        .header("x-cache", HeaderValue::from_static(served.outcome.as_str()));

    builder
        .body(Body::from(served.response.body))
        .unwrap_or_else(|e| CacheGateError::Internal(e.to_string()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Outcome, StoredResponse, Strategy};
    use axum::http::Method;

    fn origin() -> Url {
        Url::parse("http://upstream:8080").unwrap()
    }

    fn classifier() -> Classifier {
        Classifier::from_config(&CacheConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_origin_form_is_resolved_against_upstream() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/css/style.css?v=2")
            .header("accept", "text/css")
            .header("connection", "keep-alive")
            .body(Body::empty())
            .unwrap();

        let fetch = to_fetch_request(&origin(), Some(&classifier()), request).await.unwrap();

        assert_eq!(fetch.url, "http://upstream:8080/css/style.css?v=2");
        assert_eq!(fetch.method, Method::GET);
        assert!(fetch.headers.iter().any(|(k, v)| k == "accept" && v == "text/css"));
        assert!(!fetch.headers.iter().any(|(k, _)| k == "connection"));
    }

    #[tokio::test]
    async fn test_absolute_form_is_kept() {
        let request = Request::builder()
            .uri("https://fonts.googleapis.com/css2?family=Inter")
            .body(Body::empty())
            .unwrap();

        let fetch = to_fetch_request(&origin(), Some(&classifier()), request).await.unwrap();
        assert_eq!(fetch.url, "https://fonts.googleapis.com/css2?family=Inter");
    }

    #[tokio::test]
    async fn test_absolute_form_for_upstream_is_kept() {
        let request = Request::builder()
            .uri("http://upstream:8080/about")
            .body(Body::empty())
            .unwrap();

        let fetch = to_fetch_request(&origin(), None, request).await.unwrap();
        assert_eq!(fetch.url, "http://upstream:8080/about");
    }

    #[tokio::test]
    async fn test_absolute_form_for_other_hosts_is_rejected() {
        for target in [
            "http://169.254.169.254/latest/meta-data/",
            "https://cdn.example.com/photo.png",
            "http://upstream:9090/about",
        ] {
            let request = Request::builder().uri(target).body(Body::empty()).unwrap();
            let err = to_fetch_request(&origin(), Some(&classifier()), request)
                .await
                .err()
                .unwrap();
            assert!(matches!(err, CacheGateError::InvalidRequest(_)));
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_external_origin_needs_active_classifier() {
        let request = Request::builder()
            .uri("https://fonts.gstatic.com/s/inter.woff2")
            .body(Body::empty())
            .unwrap();

        assert!(to_fetch_request(&origin(), None, request).await.is_err());
    }

    #[tokio::test]
    async fn test_body_is_forwarded() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/contact")
            .body(Body::from("name=alice"))
            .unwrap();

        let fetch = to_fetch_request(&origin(), Some(&classifier()), request).await.unwrap();
        assert_eq!(fetch.body.as_ref(), b"name=alice");
    }

    #[tokio::test]
    async fn test_served_response_carries_cache_headers() {
        let served = Served {
            response: StoredResponse::new(
                200,
                vec![
                    ("content-type".to_string(), "text/css".to_string()),
                    ("transfer-encoding".to_string(), "chunked".to_string()),
                ],
                "body{}",
            ),
            strategy: Strategy::CacheFirst,
            outcome: Outcome::Hit,
        };

        let response = served_response(served);

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["x-cache-strategy"], "cache-first");
        assert_eq!(headers["x-cache"], "hit");
        assert_eq!(headers["content-type"], "text/css");
        assert!(headers.get("transfer-encoding").is_none());

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"body{}");
    }

    #[tokio::test]
    async fn test_synthetic_status_is_kept() {
        let served = Served {
            response: StoredResponse::synthetic(503, "Offline"),
            strategy: Strategy::CacheFirst,
            outcome: Outcome::Offline,
        };

        let response = served_response(served);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["x-cache"], "offline");
    }
}
