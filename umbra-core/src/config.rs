//! Pipeline configuration
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! [transport]
//! socks_addr = "127.0.0.1:9150"
//! rotate_after_requests = 25
//!
//! [search]
//! engines = ["Ahmia", "Tor66"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UmbraConfig {
    pub transport: TransportConfig,
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub scrape: ScrapeConfig,
    pub summarizer: SummarizerConfig,
}

impl UmbraConfig {
    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        non_zero("transport.rotate_after_requests", self.transport.rotate_after_requests)?;
        non_zero("transport.max_consecutive_failures", self.transport.max_consecutive_failures as u64)?;
        non_zero("transport.per_session_concurrency", self.transport.per_session_concurrency as u64)?;
        non_zero("transport.max_sessions", self.transport.max_sessions as u64)?;
        non_zero("transport.session_retry_attempts", self.transport.session_retry_attempts as u64)?;
        non_zero("search.max_concurrent_engines", self.search.max_concurrent_engines as u64)?;
        non_zero("search.limit", self.search.limit as u64)?;
        non_zero("scrape.concurrency", self.scrape.concurrency as u64)?;
        non_zero("scrape.breaker_threshold", self.scrape.breaker_threshold as u64)?;

        if !(0.0..1.0).contains(&self.scrape.backoff_jitter) {
            return Err(ConfigError::Invalid {
                field: "scrape.backoff_jitter",
                reason: format!("{} is outside [0, 1)", self.scrape.backoff_jitter),
            });
        }
        if self.scrape.backoff_factor < 1.0 || self.transport.session_retry_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "backoff_factor",
                reason: "backoff factors must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }
}

/// Anonymity transport and circuit pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// SOCKS5 proxy address (host:port)
    pub socks_addr: String,
    /// Rotate a circuit after this many requests
    pub rotate_after_requests: u64,
    /// Rotate a circuit after this many consecutive failures
    pub max_consecutive_failures: u32,
    /// Maximum in-flight requests per circuit
    pub per_session_concurrency: usize,
    /// Maximum live circuits in the pool
    pub max_sessions: usize,
    /// Circuit creation attempts before entering degraded mode
    pub session_retry_attempts: u32,
    pub session_retry_base_ms: u64,
    pub session_retry_factor: f64,
    /// How long `acquire` waits for a free circuit slot
    pub acquire_timeout_secs: u64,
    /// SOCKS port reachability probe timeout
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socks_addr: "127.0.0.1:9050".to_string(),
            rotate_after_requests: 50,
            max_consecutive_failures: 2,
            per_session_concurrency: 4,
            max_sessions: 3,
            session_retry_attempts: 5,
            session_retry_base_ms: 500,
            session_retry_factor: 2.0,
            acquire_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    pub fn session_retry_base(&self) -> Duration {
        Duration::from_millis(self.session_retry_base_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub search_ttl_secs: u64,
    pub content_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_ttl_secs: crate::DEFAULT_SEARCH_TTL_SECS,
            content_ttl_secs: crate::DEFAULT_CONTENT_TTL_SECS,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }

    pub fn content_ttl(&self) -> Duration {
        Duration::from_secs(self.content_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Engines to query by registry name (empty = all registered)
    pub engines: Vec<String>,
    /// Per-engine weight overrides
    pub engine_weights: BTreeMap<String, f64>,
    pub max_concurrent_engines: usize,
    /// Merged results kept after ranking
    pub limit: usize,
    /// Results requested from each engine
    pub per_engine_limit: usize,
    pub engine_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engines: Vec::new(),
            engine_weights: BTreeMap::new(),
            max_concurrent_engines: 5,
            limit: 100,
            per_engine_limit: 50,
            engine_timeout_secs: 60,
        }
    }
}

impl SearchConfig {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub concurrency: usize,
    /// Top merged results handed to the scraper
    pub max_urls: usize,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    /// Relative jitter applied to each backoff delay (0.2 = ±20%)
    pub backoff_jitter: f64,
    /// Consecutive failures that open a host's breaker
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Characters of page text kept per URL
    pub max_content_chars: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_urls: 20,
            request_timeout_secs: 15,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_factor: 2.0,
            backoff_jitter: 0.2,
            breaker_threshold: 5,
            breaker_cooldown_secs: 120,
            max_content_chars: 8000,
        }
    }
}

impl ScrapeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub enabled: bool,
    /// Registered completion backend name
    pub provider: Option<String>,
    pub timeout_secs: u64,
    pub max_sources: usize,
    pub max_chars_per_source: usize,
    pub max_entities: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            timeout_secs: 120,
            max_sources: 10,
            max_chars_per_source: 1500,
            max_entities: 50,
        }
    }
}

impl SummarizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UmbraConfig::default();
        assert_eq!(config.transport.rotate_after_requests, 50);
        assert_eq!(config.transport.max_consecutive_failures, 2);
        assert_eq!(config.transport.per_session_concurrency, 4);
        assert_eq!(config.transport.session_retry_attempts, 5);
        assert_eq!(config.transport.session_retry_base(), Duration::from_millis(500));
        assert_eq!(config.cache.search_ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache.content_ttl(), Duration::from_secs(6 * 3600));
        assert_eq!(config.search.max_concurrent_engines, 5);
        assert_eq!(config.scrape.concurrency, 5);
        assert_eq!(config.scrape.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.scrape.breaker_cooldown(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = UmbraConfig::from_toml(
            r#"
            [transport]
            socks_addr = "127.0.0.1:9150"
            rotate_after_requests = 10

            [search]
            engines = ["Ahmia"]

            [search.engine_weights]
            Ahmia = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.socks_addr, "127.0.0.1:9150");
        assert_eq!(config.transport.rotate_after_requests, 10);
        assert_eq!(config.transport.per_session_concurrency, 4);
        assert_eq!(config.search.engines, vec!["Ahmia".to_string()]);
        assert_eq!(config.search.engine_weights.get("Ahmia"), Some(&0.5));
        assert_eq!(config.scrape.max_retries, 3);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = UmbraConfig::from_toml("[scrape]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "scrape.concurrency", .. }));

        let err = UmbraConfig::from_toml("[scrape]\nbackoff_jitter = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        assert!(matches!(
            UmbraConfig::from_toml("transport = 3").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
