use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::CacheConfig;
use crate::persistence::SnapshotConfig;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub persistence: SnapshotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 15600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Origin requests are forwarded to
    pub origin: String,
    /// Overall request timeout, 0 = client default
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080".to_string(),
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.origin_url()?;
        if self.cache.static_name.is_empty() || self.cache.dynamic_name.is_empty() {
            anyhow::bail!("cache partition names must not be empty");
        }
        if self.cache.static_name == self.cache.dynamic_name {
            anyhow::bail!(
                "static and dynamic partitions must have different names (both '{}')",
                self.cache.static_name
            );
        }
        if self.cache.dynamic_max_items == 0 {
            anyhow::bail!("cache.dynamic_max_items must be at least 1");
        }
        if let Some(bad) = self
            .cache
            .static_assets
            .iter()
            .find(|p| !p.starts_with('/'))
        {
            anyhow::bail!("static asset '{}' must be root-relative", bad);
        }
        Ok(())
    }

    /// Parsed upstream origin
    pub fn origin_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.upstream.origin)
            .map_err(|e| anyhow::anyhow!("invalid upstream origin '{}': {}", self.upstream.origin, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("upstream origin must be http or https, got '{}'", url.scheme());
        }
        Ok(url)
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream.timeout_secs > 0).then(|| Duration::from_secs(self.upstream.timeout_secs))
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:15600");
        assert_eq!(config.cache.static_name, "portfolio-v1.0.0");
        assert!(config.upstream_timeout().is_none());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
upstream:
  origin: "http://localhost:3000"
  timeout_secs: 10
cache:
  static_name: site-v2
  dynamic_name: site-dynamic-v2
  dynamic_max_items: 20
  static_assets: ["/", "/index.html"]
  fallback_asset: null
  patterns:
    images: '\.(png|jpg)$'
    fonts: '\.woff2$'
    external: '^https://cdn\.example\.com'
    api_markers: ["/api/"]
"#;
        let config = ServerConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.port, 15600);
        assert_eq!(config.upstream.origin, "http://localhost:3000");
        assert_eq!(config.upstream_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.cache.dynamic_max_items, 20);
        assert_eq!(config.cache.static_assets.len(), 2);
        assert!(config.cache.fallback_asset.is_none());
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_rejects_same_partition_names() {
        let mut config = ServerConfig::default();
        config.cache.dynamic_name = config.cache.static_name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_cap() {
        let mut config = ServerConfig::default();
        config.cache.dynamic_max_items = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_relative_assets() {
        let mut config = ServerConfig::default();
        config.cache.static_assets.push("css/extra.css".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_origin() {
        let mut config = ServerConfig::default();
        config.upstream.origin = "ftp://files.example.com".to_string();
        assert!(config.validate().is_err());

        config.upstream.origin = "not a url".to_string();
        assert!(config.origin_url().is_err());
    }
}
