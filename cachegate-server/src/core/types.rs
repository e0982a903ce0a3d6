use axum::http::Method;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Cache lookup key: method + absolute URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn new(method: &Method, url: impl Into<String>) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(&Method::GET, url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An intercepted request, ready to be answered from cache or forwarded
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    /// Absolute URL (scheme + host + path + query)
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, self.url.clone())
    }
}

/// Snapshot of an HTTP response as stored in a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StoredResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Plain-text response produced locally instead of by the network
    pub fn synthetic(status: u16, text: &'static str) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Bytes::from_static(text.as_bytes()),
        }
    }

    /// 2xx status; only these are ever written to a partition
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Stored response plus bookkeeping
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub response: StoredResponse,
    /// Insertion sequence, monotonically increasing per partition
    pub seq: u64,
    pub stored_at: Instant,
}

/// Caching policy applied to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cache hit first, static partition on miss
    CacheFirst,
    /// Cache hit first, bounded dynamic partition on miss, fallback asset on failure
    CacheFirstWithFallback,
    /// Cache hit first for fonts and external font origins
    CacheFirstLongTerm,
    /// Network first, cached copy when offline
    NetworkFirst,
    /// Cached copy now, refresh in background
    StaleWhileRevalidate,
    /// Not cached at all (non-GET)
    Passthrough,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheFirst => "cache-first",
            Self::CacheFirstWithFallback => "cache-first-fallback",
            Self::CacheFirstLongTerm => "cache-first-long-term",
            Self::NetworkFirst => "network-first",
            Self::StaleWhileRevalidate => "stale-while-revalidate",
            Self::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Served from a partition
    Hit,
    /// Served from the network
    Miss,
    /// Synthetic response or fallback asset after a network failure
    Offline,
    /// Forwarded without touching any partition
    Bypass,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Offline => "offline",
            Self::Bypass => "bypass",
        }
    }
}

/// Result of handling one intercepted request
#[derive(Debug, Clone)]
pub struct Served {
    pub response: StoredResponse,
    pub strategy: Strategy,
    pub outcome: Outcome,
}

/// Counters for the cache engine
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub network_failures: u64,
    pub synthetic_responses: u64,
    pub revalidations: u64,
    pub bypassed: u64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// URL patterns used to classify requests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PatternConfig {
    /// Regex matched against the full URL (images)
    pub images: String,
    /// Regex matched against the full URL (web fonts)
    pub fonts: String,
    /// Regex matched against the full URL (external font origins)
    pub external: String,
    /// Substrings marking API / data requests
    pub api_markers: Vec<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            images: r"(?i)\.(jpg|jpeg|png|gif|webp|svg|ico)$".to_string(),
            fonts: r"(?i)\.(woff|woff2|ttf|otf|eot)$".to_string(),
            external: r"^https://(fonts\.googleapis\.com|fonts\.gstatic\.com)".to_string(),
            api_markers: vec!["/api/".to_string(), ".json".to_string()],
        }
    }
}

/// Configuration for one cache version
///
/// The two partition names double as the version: changing either one
/// makes activation delete the old partitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Partition for build-time assets
    pub static_name: String,
    /// Partition for runtime-fetched content
    pub dynamic_name: String,
    /// Item cap for the dynamic partition
    pub dynamic_max_items: usize,
    /// Root-relative paths fetched at install
    pub static_assets: Vec<String>,
    /// Served from cache when an image cannot be fetched
    pub fallback_asset: Option<String>,
    pub patterns: PatternConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            static_name: "portfolio-v1.0.0".to_string(),
            dynamic_name: "portfolio-dynamic-v1.0.0".to_string(),
            dynamic_max_items: 50,
            static_assets: [
                "/",
                "/index.html",
                "/css/style.css",
                "/css/responsive.css",
                "/css/animations.css",
                "/css/critical.css",
                "/js/main.js",
                "/js/modules/navigation.js",
                "/js/modules/lazyload.js",
                "/js/modules/scroll.js",
                "/js/modules/projects.js",
                "/js/modules/skills.js",
                "/js/modules/form.js",
                "/js/modules/animations.js",
                "/js/modules/footer.js",
                "/data/projects.json",
                "/data/skills.json",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            fallback_asset: Some("/assets/images/fallback.svg".to_string()),
            patterns: PatternConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Version label used in logs
    pub fn version(&self) -> &str {
        &self.static_name
    }

    /// Names of the partitions this version owns
    pub fn partition_names(&self) -> [&str; 2] {
        [self.static_name.as_str(), self.dynamic_name.as_str()]
    }
}
