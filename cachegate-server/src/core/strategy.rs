//! Caching strategies
//!
//! Every strategy makes at most one network request per invocation and
//! recovers from network failure locally: callers always get a response.

use super::error::Result;
use super::fetcher::Fetcher;
use super::storage::CacheStorage;
use super::types::{
    CacheConfig, CacheStats, FetchRequest, Outcome, RequestKey, Served, Strategy, StoredResponse,
};
use crate::metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

const OFFLINE: &str = "Offline";
const DATA_NOT_AVAILABLE: &str = "Data not available";
const RESOURCE_NOT_AVAILABLE: &str = "Resource not available";
const CONTENT_NOT_AVAILABLE: &str = "Content not available";
const IMAGE_NOT_AVAILABLE: &str = "Image not available";

/// Runs the caching strategies for one cache version
///
/// Strategies only write into partitions that already exist. Creating
/// them is the lifecycle's job, so a replaced version cannot bring back
/// a partition that activation deleted.
#[derive(Clone)]
pub struct StrategyEngine {
    config: Arc<CacheConfig>,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    stats: Arc<RwLock<CacheStats>>,
    /// Fallback asset resolved against the upstream origin
    fallback_key: Option<RequestKey>,
}

impl StrategyEngine {
    pub fn new(
        config: Arc<CacheConfig>,
        origin: &Url,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let fallback_key = config
            .fallback_asset
            .as_deref()
            .and_then(|path| origin.join(path).ok())
            .map(|url| RequestKey::get(url.as_str()));

        Self {
            config,
            storage,
            fetcher,
            stats: Arc::new(RwLock::new(CacheStats::default())),
            fallback_key,
        }
    }

    /// Create this version's partitions if missing
    pub fn open_partitions(&self) {
        for name in self.config.partition_names() {
            self.storage.open(name);
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    /// Run a strategy. Only `Passthrough` can fail: it is a plain proxy
    /// and a network failure is reported to the caller.
    pub async fn run(&self, strategy: Strategy, request: &FetchRequest) -> Result<Served> {
        let (response, outcome) = match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::CacheFirstWithFallback => self.cache_first_with_fallback(request).await,
            Strategy::CacheFirstLongTerm => self.cache_first_long_term(request).await,
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            Strategy::Passthrough => (self.passthrough(request).await?, Outcome::Bypass),
        };

        metrics::record_strategy(strategy.as_str(), outcome.as_str());
        Ok(Served {
            response,
            strategy,
            outcome,
        })
    }

    /// Forward without reading or writing any partition
    pub async fn passthrough(&self, request: &FetchRequest) -> Result<StoredResponse> {
        self.stats.write().bypassed += 1;
        self.fetcher.fetch(request).await.inspect_err(|e| {
            self.network_failed(Strategy::Passthrough, request, &e.to_string());
        })
    }

    /// Cached entry from any partition; otherwise network, stored in the
    /// static partition on 2xx. 503 when both fail.
    pub async fn cache_first(&self, request: &FetchRequest) -> (StoredResponse, Outcome) {
        self.cache_then_network(request, Strategy::CacheFirst, 503, OFFLINE)
            .await
    }

    /// Like `cache_first`, for fonts and external font origins. 404 when
    /// both fail.
    pub async fn cache_first_long_term(&self, request: &FetchRequest) -> (StoredResponse, Outcome) {
        self.cache_then_network(
            request,
            Strategy::CacheFirstLongTerm,
            404,
            RESOURCE_NOT_AVAILABLE,
        )
        .await
    }

    async fn cache_then_network(
        &self,
        request: &FetchRequest,
        strategy: Strategy,
        fail_status: u16,
        fail_text: &'static str,
    ) -> (StoredResponse, Outcome) {
        let key = request.key();
        if let Some(cached) = self.lookup(&key) {
            return (cached, Outcome::Hit);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.put_static(key, response.clone());
                }
                (response, Outcome::Miss)
            }
            Err(e) => {
                self.network_failed(strategy, request, &e.to_string());
                (self.synthetic(fail_status, fail_text), Outcome::Offline)
            }
        }
    }

    /// Cached entry, else network into the bounded dynamic partition.
    /// On failure the fallback asset (if cached) or 404.
    pub async fn cache_first_with_fallback(
        &self,
        request: &FetchRequest,
    ) -> (StoredResponse, Outcome) {
        let key = request.key();
        if let Some(cached) = self.lookup(&key) {
            return (cached, Outcome::Hit);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.put_dynamic(key, response.clone());
                }
                (response, Outcome::Miss)
            }
            Err(e) => {
                self.network_failed(Strategy::CacheFirstWithFallback, request, &e.to_string());
                match self.fallback_asset() {
                    Some(fallback) => (fallback, Outcome::Offline),
                    None => (self.synthetic(404, IMAGE_NOT_AVAILABLE), Outcome::Offline),
                }
            }
        }
    }

    /// Network first, stored into the dynamic partition on 2xx. Offline
    /// falls back to any cached copy, else 503.
    pub async fn network_first(&self, request: &FetchRequest) -> (StoredResponse, Outcome) {
        let key = request.key();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.put_dynamic(key, response.clone());
                }
                self.stats.write().misses += 1;
                (response, Outcome::Miss)
            }
            Err(e) => {
                self.network_failed(Strategy::NetworkFirst, request, &e.to_string());
                match self.lookup(&key) {
                    Some(cached) => (cached, Outcome::Hit),
                    None => (self.synthetic(503, DATA_NOT_AVAILABLE), Outcome::Offline),
                }
            }
        }
    }

    /// Cached copy right away plus a detached refresh; with nothing cached,
    /// wait for the network and answer 404 if it fails.
    pub async fn stale_while_revalidate(
        &self,
        request: &FetchRequest,
    ) -> (StoredResponse, Outcome) {
        let key = request.key();

        if let Some(cached) = self.lookup(&key) {
            self.spawn_revalidation(request.clone());
            return (cached, Outcome::Hit);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() {
                    self.put_dynamic(key, response.clone());
                }
                (response, Outcome::Miss)
            }
            Err(e) => {
                self.network_failed(Strategy::StaleWhileRevalidate, request, &e.to_string());
                (self.synthetic(404, CONTENT_NOT_AVAILABLE), Outcome::Offline)
            }
        }
    }

    /// Refresh the dynamic partition in the background. The task's outcome
    /// is only visible through the partition; failures end here.
    fn spawn_revalidation(&self, request: FetchRequest) {
        let engine = self.clone();
        tokio::spawn(async move {
            match engine.fetcher.fetch(&request).await {
                Ok(response) if response.is_ok() => {
                    engine.put_dynamic(request.key(), response);
                    engine.stats.write().revalidations += 1;
                    debug!("Revalidated {}", request.url);
                }
                Ok(response) => {
                    debug!(
                        "Revalidation of {} returned {}, keeping cached copy",
                        request.url, response.status
                    );
                }
                Err(e) => {
                    engine.stats.write().network_failures += 1;
                    metrics::record_network_failure(Strategy::StaleWhileRevalidate.as_str());
                    debug!("Revalidation of {} failed: {}", request.url, e);
                }
            }
        });
    }

    /// Search all partitions, counting hit/miss
    fn lookup(&self, key: &RequestKey) -> Option<StoredResponse> {
        let found = self.storage.match_request(key);
        let mut stats = self.stats.write();
        if found.is_some() {
            stats.hits += 1;
            debug!("Cache HIT {}", key);
        } else {
            stats.misses += 1;
            debug!("Cache MISS {}", key);
        }
        found
    }

    fn put_static(&self, key: RequestKey, response: StoredResponse) {
        let Some(partition) = self.storage.get(&self.config.static_name) else {
            debug!("Skip PUT {}: '{}' is gone", key, self.config.static_name);
            return;
        };
        partition.put(key, response);
        self.stats.write().puts += 1;
    }

    /// Write into the dynamic partition without letting it exceed its cap
    pub fn put_dynamic(&self, key: RequestKey, response: StoredResponse) {
        let Some(partition) = self.storage.get(&self.config.dynamic_name) else {
            debug!("Skip PUT {}: '{}' is gone", key, self.config.dynamic_name);
            return;
        };
        let evicted = partition.put_bounded(key, response, self.config.dynamic_max_items);

        let mut stats = self.stats.write();
        stats.puts += 1;
        stats.evictions += evicted.len() as u64;
        drop(stats);

        if !evicted.is_empty() {
            metrics::record_evictions(&self.config.dynamic_name, evicted.len());
        }
    }

    /// Trim the dynamic partition to its cap, oldest first
    pub fn trim_dynamic(&self) -> usize {
        match self.storage.get(&self.config.dynamic_name) {
            Some(partition) => {
                let evicted = partition.trim(self.config.dynamic_max_items).len();
                self.stats.write().evictions += evicted as u64;
                evicted
            }
            None => 0,
        }
    }

    /// Cached fallback image of the site, whatever host the image was on
    fn fallback_asset(&self) -> Option<StoredResponse> {
        let key = self.fallback_key.as_ref()?;
        self.storage.match_request(key)
    }

    fn synthetic(&self, status: u16, text: &'static str) -> StoredResponse {
        self.stats.write().synthetic_responses += 1;
        StoredResponse::synthetic(status, text)
    }

    fn network_failed(&self, strategy: Strategy, request: &FetchRequest, reason: &str) {
        self.stats.write().network_failures += 1;
        metrics::record_network_failure(strategy.as_str());
        warn!(
            "Network failure ({}) for {} {}: {}",
            strategy, request.method, request.url, reason
        );
    }
}
