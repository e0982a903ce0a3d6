//! Request classification
//!
//! Maps each intercepted request to exactly one caching strategy. Rules are
//! evaluated in order and the first match wins; anything unmatched falls
//! through to stale-while-revalidate. Non-GET requests never reach the
//! rules and are always passed through.

use super::error::{CacheGateError, Result};
use super::types::{CacheConfig, Strategy};
use axum::http::Method;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

/// Predicate over a request URL
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Path (no query) is exactly one of the listed assets
    StaticManifest(HashSet<String>),
    /// Regex over the full URL
    UrlPattern(Regex),
    /// Full URL contains any of the substrings
    UrlContains(Vec<String>),
}

impl Matcher {
    pub fn matches(&self, url: &str, path: &str) -> bool {
        match self {
            Self::StaticManifest(paths) => paths.contains(path),
            Self::UrlPattern(re) => re.is_match(url),
            Self::UrlContains(markers) => markers.iter().any(|m| url.contains(m.as_str())),
        }
    }
}

/// One entry of the dispatch table
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: &'static str,
    pub matcher: Matcher,
    pub strategy: Strategy,
}

/// Ordered (matcher, strategy) table
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<RouteRule>,
    default: Strategy,
}

impl Classifier {
    /// Compile the dispatch table for a cache version
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let compile = |label: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                CacheGateError::Config(format!("invalid {} pattern '{}': {}", label, pattern, e))
            })
        };

        let manifest: HashSet<String> = config.static_assets.iter().cloned().collect();

        let rules = vec![
            RouteRule {
                name: "static-manifest",
                matcher: Matcher::StaticManifest(manifest),
                strategy: Strategy::CacheFirst,
            },
            RouteRule {
                name: "images",
                matcher: Matcher::UrlPattern(compile("images", &config.patterns.images)?),
                strategy: Strategy::CacheFirstWithFallback,
            },
            RouteRule {
                name: "fonts",
                matcher: Matcher::UrlPattern(compile("fonts", &config.patterns.fonts)?),
                strategy: Strategy::CacheFirstLongTerm,
            },
            RouteRule {
                name: "external",
                matcher: Matcher::UrlPattern(compile("external", &config.patterns.external)?),
                strategy: Strategy::CacheFirstLongTerm,
            },
            RouteRule {
                name: "api",
                matcher: Matcher::UrlContains(config.patterns.api_markers.clone()),
                strategy: Strategy::NetworkFirst,
            },
        ];

        Ok(Self {
            rules,
            default: Strategy::StaleWhileRevalidate,
        })
    }

    /// Build from an explicit table
    pub fn with_rules(rules: Vec<RouteRule>, default: Strategy) -> Self {
        Self { rules, default }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Pick the strategy for a request
    pub fn classify(&self, method: &Method, url: &str) -> Strategy {
        if *method != Method::GET {
            return Strategy::Passthrough;
        }

        let path = pathname(url);
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(url, &path))
            .map(|rule| rule.strategy)
            .unwrap_or(self.default)
    }

    /// True when the URL belongs to one of the configured external origins
    pub fn is_external(&self, url: &str) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.name == "external")
            .any(|rule| rule.matcher.matches(url, &pathname(url)))
    }
}

/// Path component of an absolute URL; the input itself if it does not parse
pub fn pathname(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::from_config(&CacheConfig::default()).unwrap()
    }

    fn get(c: &Classifier, url: &str) -> Strategy {
        c.classify(&Method::GET, url)
    }

    #[test]
    fn test_static_manifest_is_cache_first() {
        let c = classifier();
        assert_eq!(get(&c, "http://site/"), Strategy::CacheFirst);
        assert_eq!(get(&c, "http://site/css/style.css"), Strategy::CacheFirst);
        assert_eq!(get(&c, "http://site/js/main.js?v=3"), Strategy::CacheFirst);
    }

    #[test]
    fn test_manifest_beats_json_rule() {
        // /data/projects.json is in the manifest, so it is cache-first,
        // not network-first
        let c = classifier();
        assert_eq!(get(&c, "http://site/data/projects.json"), Strategy::CacheFirst);
        assert_eq!(get(&c, "http://site/data/other.json"), Strategy::NetworkFirst);
    }

    #[test]
    fn test_images() {
        let c = classifier();
        assert_eq!(
            get(&c, "http://site/assets/images/hero.webp"),
            Strategy::CacheFirstWithFallback
        );
        assert_eq!(
            get(&c, "http://site/assets/LOGO.PNG"),
            Strategy::CacheFirstWithFallback
        );
    }

    #[test]
    fn test_fonts_and_external_origins() {
        let c = classifier();
        assert_eq!(
            get(&c, "http://site/fonts/inter.woff2"),
            Strategy::CacheFirstLongTerm
        );
        assert_eq!(
            get(&c, "https://fonts.googleapis.com/css2?family=Inter"),
            Strategy::CacheFirstLongTerm
        );
        assert_eq!(
            get(&c, "https://fonts.gstatic.com/s/inter/v12/abc"),
            Strategy::CacheFirstLongTerm
        );
    }

    #[test]
    fn test_api_is_network_first() {
        let c = classifier();
        assert_eq!(get(&c, "http://site/api/contact"), Strategy::NetworkFirst);
    }

    #[test]
    fn test_default_is_stale_while_revalidate() {
        let c = classifier();
        assert_eq!(get(&c, "http://site/about"), Strategy::StaleWhileRevalidate);
        assert_eq!(
            get(&c, "http://site/projects/alpha.html"),
            Strategy::StaleWhileRevalidate
        );
    }

    #[test]
    fn test_non_get_is_passthrough() {
        let c = classifier();
        assert_eq!(
            c.classify(&Method::POST, "http://site/api/contact"),
            Strategy::Passthrough
        );
        assert_eq!(
            c.classify(&Method::PUT, "http://site/index.html"),
            Strategy::Passthrough
        );
        assert_eq!(
            c.classify(&Method::HEAD, "http://site/index.html"),
            Strategy::Passthrough
        );
    }

    #[test]
    fn test_rule_order_is_inspectable() {
        let c = classifier();
        let names: Vec<_> = c.rules().iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["static-manifest", "images", "fonts", "external", "api"]);
    }

    #[test]
    fn test_custom_table() {
        let c = Classifier::with_rules(
            vec![RouteRule {
                name: "everything-api",
                matcher: Matcher::UrlContains(vec!["/".to_string()]),
                strategy: Strategy::NetworkFirst,
            }],
            Strategy::CacheFirst,
        );
        assert_eq!(get(&c, "http://site/x"), Strategy::NetworkFirst);
        assert_eq!(get(&c, "nothing"), Strategy::CacheFirst);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let mut config = CacheConfig::default();
        config.patterns.images = "(unclosed".to_string();
        let err = Classifier::from_config(&config).unwrap_err();
        assert!(matches!(err, CacheGateError::Config(_)));
    }

    #[test]
    fn test_is_external() {
        let c = classifier();
        assert!(c.is_external("https://fonts.googleapis.com/css2?family=Inter"));
        assert!(c.is_external("https://fonts.gstatic.com/s/inter/v1.woff2"));
        assert!(!c.is_external("https://cdn.example.com/font.woff2"));
        assert!(!c.is_external("http://169.254.169.254/latest/meta-data/"));
    }

    #[test]
    fn test_pathname() {
        assert_eq!(pathname("http://site/a/b.css?x=1#top"), "/a/b.css");
        assert_eq!(pathname("/relative?x=1"), "/relative");
    }
}
