//! Worker lifecycle
//!
//! A `ServiceWorker` owns one cache version. It goes
//! `Installing -> Waiting -> Activating -> Active`, or ends `Redundant`
//! when its install fails or a newer version replaces it. The
//! `WorkerRegistry` holds the active worker; while none is active every
//! request goes straight to the network.

use super::classifier::Classifier;
use super::dispatcher::Dispatcher;
use super::error::{CacheGateError, Result};
use super::fetcher::Fetcher;
use super::storage::CacheStorage;
use super::strategy::StrategyEngine;
use super::types::{
    CacheConfig, CacheStats, FetchRequest, Outcome, RequestKey, Served, Strategy, StoredResponse,
};
use crate::metrics;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    Waiting,
    Activating,
    Active,
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        }
    }
}

/// One installed cache version
pub struct ServiceWorker {
    id: u64,
    config: Arc<CacheConfig>,
    origin: Url,
    dispatcher: Dispatcher,
    state: RwLock<WorkerState>,
}

impl ServiceWorker {
    pub fn new(
        id: u64,
        config: CacheConfig,
        origin: Url,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let classifier = Classifier::from_config(&config)?;
        let engine = StrategyEngine::new(config.clone(), &origin, storage, fetcher);

        Ok(Self {
            id,
            config,
            origin,
            dispatcher: Dispatcher::new(classifier, engine),
            state: RwLock::new(WorkerState::Installing),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> &str {
        self.config.version()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> CacheStats {
        self.dispatcher.engine().stats()
    }

    fn storage(&self) -> &CacheStorage {
        self.dispatcher.engine().storage()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
        info!(
            "Worker #{} ({}) is now {}",
            self.id,
            self.version(),
            state.as_str()
        );
    }

    /// Absolute URL of a root-relative asset path
    pub fn asset_url(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| CacheGateError::Config(format!("asset path '{}': {}", path, e)))
    }

    /// Pre-populate the static partition from the manifest.
    ///
    /// All or nothing: every asset must come back 2xx or nothing is
    /// written and the worker becomes redundant.
    pub async fn install(&self) -> Result<usize> {
        self.set_state(WorkerState::Installing);

        let static_name = self.config.static_name.clone();
        let existed = self.storage().has(&static_name);
        let partition = self.storage().open(&static_name);

        let result = self.fetch_manifest().await;
        match result {
            Ok(responses) => {
                let count = responses.len();
                for (key, response) in responses {
                    partition.put(key, response);
                }
                metrics::record_install("success");
                info!("Cached {} static assets into '{}'", count, static_name);
                self.set_state(WorkerState::Waiting);
                Ok(count)
            }
            Err(reason) => {
                if !existed {
                    self.storage().delete(&static_name);
                }
                metrics::record_install("failure");
                self.set_state(WorkerState::Redundant);
                Err(CacheGateError::InstallFailed {
                    version: self.version().to_string(),
                    reason,
                })
            }
        }
    }

    async fn fetch_manifest(
        &self,
    ) -> std::result::Result<Vec<(RequestKey, StoredResponse)>, String> {
        let mut requests = Vec::with_capacity(self.config.static_assets.len());
        for path in &self.config.static_assets {
            let url = self.asset_url(path).map_err(|e| e.to_string())?;
            requests.push(FetchRequest::get(url.as_str()));
        }

        let fetcher = self.dispatcher.engine().fetcher();
        let results = join_all(requests.iter().map(|req| fetcher.fetch(req))).await;

        let mut responses = Vec::with_capacity(results.len());
        for (req, result) in requests.iter().zip(results) {
            match result {
                Ok(response) if response.is_ok() => responses.push((req.key(), response)),
                Ok(response) => {
                    return Err(format!("{} returned {}", req.url, response.status));
                }
                Err(e) => return Err(format!("{}: {}", req.url, e)),
            }
        }
        Ok(responses)
    }

    /// Move straight on to activation without waiting for the previous
    /// version to be released
    pub fn skip_waiting(&self) {
        if self.state() == WorkerState::Waiting {
            self.set_state(WorkerState::Activating);
        }
    }

    /// Delete every partition this version does not own and start serving.
    /// Returns the deleted partition names.
    pub fn activate(&self) -> Vec<String> {
        self.set_state(WorkerState::Activating);

        let deleted = self.storage().retain_only(&self.config.partition_names());
        for name in &deleted {
            info!("Deleted old cache partition '{}'", name);
        }
        self.dispatcher.engine().open_partitions();

        self.set_state(WorkerState::Active);
        deleted
    }

    fn retire(&self) {
        self.set_state(WorkerState::Redundant);
    }

    /// Trim the dynamic partition to its cap
    pub fn trim_dynamic(&self) -> usize {
        self.dispatcher.engine().trim_dynamic()
    }

    pub async fn handle(&self, request: &FetchRequest) -> Result<Served> {
        self.dispatcher.handle(request).await
    }
}

/// Holds the active worker and drives install/activate
pub struct WorkerRegistry {
    origin: Url,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    active: RwLock<Option<Arc<ServiceWorker>>>,
    next_id: AtomicU64,
    /// One registration at a time
    update_lock: tokio::sync::Mutex<()>,
}

impl WorkerRegistry {
    pub fn new(origin: Url, storage: CacheStorage, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            origin,
            storage,
            fetcher,
            active: RwLock::new(None),
            next_id: AtomicU64::new(1),
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.active.read().clone()
    }

    /// Install a cache version and, if that succeeds, activate it and take
    /// over from the previous one. On install failure the previous worker
    /// keeps serving.
    pub async fn register(&self, config: CacheConfig) -> Result<Arc<ServiceWorker>> {
        let _guard = self.update_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let worker = Arc::new(ServiceWorker::new(
            id,
            config,
            self.origin.clone(),
            self.storage.clone(),
            self.fetcher.clone(),
        )?);

        info!("Installing cache version '{}' (worker #{})", worker.version(), id);
        if let Err(e) = worker.install().await {
            match self.active() {
                Some(current) => warn!(
                    "{}; keeping worker #{} ({}) active",
                    e,
                    current.id(),
                    current.version()
                ),
                None => error!("{}; no active worker, requests go to the network", e),
            }
            return Err(e);
        }

        worker.skip_waiting();
        worker.activate();

        // Claim: new requests go to this worker from here on
        let previous = self.active.write().replace(worker.clone());
        if let Some(previous) = previous {
            previous.retire();
        }

        info!("Cache version '{}' active", worker.version());
        Ok(worker)
    }

    /// Serve a request through the active worker, or straight from the
    /// network when there is none
    pub async fn handle(&self, request: &FetchRequest) -> Result<Served> {
        if let Some(worker) = self.active() {
            return worker.handle(request).await;
        }

        let response = self.fetcher.fetch(request).await?;
        metrics::record_strategy(Strategy::Passthrough.as_str(), Outcome::Bypass.as_str());
        Ok(Served {
            response,
            strategy: Strategy::Passthrough,
            outcome: Outcome::Bypass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::strategy::test_support::ScriptedFetcher;

    const ORIGIN: &str = "http://site";

    fn small_config(version: &str, assets: &[&str]) -> CacheConfig {
        CacheConfig {
            static_name: format!("portfolio-{}", version),
            dynamic_name: format!("portfolio-dynamic-{}", version),
            static_assets: assets.iter().map(|s| s.to_string()).collect(),
            ..CacheConfig::default()
        }
    }

    fn registry() -> (WorkerRegistry, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let registry = WorkerRegistry::new(
            Url::parse(ORIGIN).unwrap(),
            CacheStorage::new(),
            fetcher.clone(),
        );
        (registry, fetcher)
    }

    #[tokio::test]
    async fn test_install_and_activate() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/", 200, "<html>");
        fetcher.serve("http://site/css/style.css", 200, "body{}");

        let worker = registry
            .register(small_config("v1", &["/", "/css/style.css"]))
            .await
            .unwrap();

        assert_eq!(worker.state(), WorkerState::Active);
        let static_part = registry.storage().get("portfolio-v1").unwrap();
        assert_eq!(static_part.len(), 2);
        assert!(static_part.contains(&RequestKey::get("http://site/css/style.css")));
        assert_eq!(registry.active().unwrap().id(), worker.id());
    }

    #[tokio::test]
    async fn test_precached_assets_served_without_network() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/index.html", 200, "<html>v1</html>");
        registry
            .register(small_config("v1", &["/index.html"]))
            .await
            .unwrap();
        let calls_after_install = fetcher.calls();

        fetcher.set_offline(true);
        for _ in 0..3 {
            let served = registry
                .handle(&FetchRequest::get("http://site/index.html"))
                .await
                .unwrap();
            assert_eq!(served.outcome, Outcome::Hit);
            assert_eq!(served.response.body.as_ref(), b"<html>v1</html>");
        }
        assert_eq!(fetcher.calls(), calls_after_install);
    }

    #[tokio::test]
    async fn test_install_failure_keeps_previous_version() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/index.html", 200, "v1");
        let v1 = registry
            .register(small_config("v1", &["/index.html"]))
            .await
            .unwrap();

        // v2 needs an asset the origin does not have
        let err = registry
            .register(small_config("v2", &["/index.html", "/css/new.css"]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, CacheGateError::InstallFailed { .. }));
        assert_eq!(registry.active().unwrap().id(), v1.id());
        assert_eq!(v1.state(), WorkerState::Active);
        assert!(registry.storage().has("portfolio-v1"));
        // Nothing half-written for the failed version
        assert!(!registry.storage().has("portfolio-v2"));
    }

    #[tokio::test]
    async fn test_install_failure_offline_without_previous() {
        let (registry, fetcher) = registry();
        fetcher.set_offline(true);

        assert!(registry.register(small_config("v1", &["/"])).await.is_err());
        assert!(registry.active().is_none());

        // No worker: straight to the network
        fetcher.set_offline(false);
        fetcher.serve("http://site/about", 200, "about");
        let served = registry
            .handle(&FetchRequest::get("http://site/about"))
            .await
            .unwrap();
        assert_eq!(served.strategy, Strategy::Passthrough);
        assert_eq!(registry.storage().total_entries(), 0);
    }

    #[tokio::test]
    async fn test_activation_deletes_stale_partitions_only() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/", 200, "home");

        registry.register(small_config("v1", &["/"])).await.unwrap();
        registry.storage().open("portfolio-dynamic-v1");
        registry.storage().open("unrelated-cache");

        let v2 = registry.register(small_config("v2", &["/"])).await.unwrap();

        let mut names = registry.storage().names();
        names.sort();
        assert_eq!(
            names,
            vec!["portfolio-dynamic-v2".to_string(), "portfolio-v2".to_string()]
        );
        assert_eq!(v2.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_replaced_worker_cannot_resurrect_its_partitions() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/", 200, "home");
        fetcher.serve("http://site/api/data", 200, "v1-data");

        let v1 = registry.register(small_config("v1", &["/"])).await.unwrap();

        // A v1 request still in flight when v2 takes over
        fetcher.set_delay(std::time::Duration::from_millis(100));
        let in_flight = {
            let v1 = v1.clone();
            tokio::spawn(async move {
                let request = FetchRequest::get("http://site/api/data");
                v1.handle(&request).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fetcher.set_delay(std::time::Duration::ZERO);
        registry.register(small_config("v2", &["/"])).await.unwrap();

        let served = in_flight.await.unwrap().unwrap();
        assert_eq!(served.response.body.as_ref(), b"v1-data");

        let mut names = registry.storage().names();
        names.sort();
        assert_eq!(
            names,
            vec!["portfolio-dynamic-v2".to_string(), "portfolio-v2".to_string()]
        );

        // v2 offline must not find v1's data
        fetcher.set_offline(true);
        let served = registry
            .handle(&FetchRequest::get("http://site/api/data"))
            .await
            .unwrap();
        assert_eq!(served.response.status, 503);
        assert_eq!(served.outcome, Outcome::Offline);
    }

    #[tokio::test]
    async fn test_activation_keeps_current_dynamic_partition() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/", 200, "home");
        let dynamic = registry.storage().open("portfolio-dynamic-v1");
        dynamic.put(
            RequestKey::get("http://site/about"),
            StoredResponse::new(200, vec![], "about"),
        );
        registry.storage().open("portfolio-v0");

        let worker = registry.register(small_config("v1", &["/"])).await.unwrap();
        let deleted_again = worker.activate();

        assert!(deleted_again.is_empty());
        assert!(!registry.storage().has("portfolio-v0"));
        assert_eq!(registry.storage().get("portfolio-dynamic-v1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_previous_worker_becomes_redundant() {
        let (registry, fetcher) = registry();
        fetcher.serve("http://site/", 200, "home");

        let v1 = registry.register(small_config("v1", &["/"])).await.unwrap();
        let v2 = registry.register(small_config("v2", &["/"])).await.unwrap();

        assert_eq!(v1.state(), WorkerState::Redundant);
        assert_eq!(v2.state(), WorkerState::Active);
        assert!(v2.id() > v1.id());
    }

    #[tokio::test]
    async fn test_invalid_patterns_reject_registration() {
        let (registry, _) = registry();
        let mut config = small_config("v1", &["/"]);
        config.patterns.fonts = "[".to_string();

        let err = registry.register(config).await.err().unwrap();
        assert!(matches!(err, CacheGateError::Config(_)));
        assert!(registry.storage().names().is_empty());
    }
}
