//! Scrape Orchestrator
//!
//! Fetches result pages through the circuit pool with a bounded worker pool.
//! Each URL is read through the cache, retried with jittered exponential
//! backoff, and guarded by a per-host circuit breaker.

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use umbra_core::{normalize_url, url_host, CacheLayer, CancellationToken, ScrapeConfig, ScrapedContent};
use umbra_tor::{html_to_text, TransportError, TransportManager};

/// Per-URL failure after retries
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    #[error("Circuit breaker open for host {0}")]
    BreakerOpen(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ScrapeError {
    /// Worth another attempt
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status(code) => *code >= 500 || *code == 429 || *code == 408,
            Self::Transport(TransportError::Cancelled) => false,
            Self::Transport(_) => true,
            _ => false,
        }
    }

    /// Counts against the host's breaker
    fn blames_host(&self) -> bool {
        match self {
            Self::Status(code) => *code >= 500 || *code == 429 || *code == 408,
            Self::Transport(TransportError::Request(_)) | Self::Transport(TransportError::Timeout(_)) => true,
            _ => false,
        }
    }
}

/// Outcome of a fetch batch
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    /// Sorted by URL
    pub contents: Vec<ScrapedContent>,
    /// Sorted by URL
    pub errors: Vec<(String, ScrapeError)>,
    pub cache_hits: usize,
}

/// Consecutive-failure breaker for one host
#[derive(Debug, Default, Clone)]
struct HostBreaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl HostBreaker {
    /// Closed: always. Open: never until the cool-down passes, then one trial.
    fn allow(&mut self, now: Instant, cooldown: Duration) -> bool {
        match self.opened_at {
            None => true,
            Some(opened) if now.duration_since(opened) >= cooldown && !self.trial_in_flight => {
                self.trial_in_flight = true;
                true
            }
            Some(_) => false,
        }
    }

    fn on_success(&mut self) {
        *self = Self::default();
    }

    /// Returns true when this failure opened the breaker
    fn on_failure(&mut self, now: Instant, threshold: u32) -> bool {
        self.consecutive_failures += 1;
        if self.opened_at.is_some() {
            // failed trial: restart the cool-down
            self.opened_at = Some(now);
            self.trial_in_flight = false;
            return false;
        }
        if self.consecutive_failures >= threshold {
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// An allowed attempt ended without a verdict on the host
    fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }
}

pub struct ScrapeOrchestrator {
    transport: Arc<TransportManager>,
    cache: Arc<CacheLayer>,
    config: ScrapeConfig,
    ttl: Duration,
    breakers: DashMap<String, HostBreaker>,
}

impl ScrapeOrchestrator {
    pub fn new(transport: Arc<TransportManager>, cache: Arc<CacheLayer>, config: ScrapeConfig, ttl: Duration) -> Self {
        Self {
            transport,
            cache,
            config,
            ttl,
            breakers: DashMap::new(),
        }
    }

    /// Fetch every distinct URL with at most `concurrency` in flight
    pub async fn fetch(&self, urls: &[String], concurrency: usize, cancel: &CancellationToken) -> ScrapeReport {
        let mut seen = HashSet::new();
        let targets: Vec<&String> = urls.iter().filter(|u| seen.insert(normalize_url(u))).collect();

        info!("Scraping {} URLs ({} workers)", targets.len(), concurrency);

        let outcomes: Vec<(String, Result<(ScrapedContent, bool), ScrapeError>)> = stream::iter(targets)
            .map(|url| async move { (url.clone(), self.fetch_one(url, cancel).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = ScrapeReport::default();
        for (url, outcome) in outcomes {
            match outcome {
                Ok((content, cached)) => {
                    if cached {
                        report.cache_hits += 1;
                    }
                    report.contents.push(content);
                }
                Err(e) => {
                    debug!("Scrape of {} failed: {}", url, e);
                    report.errors.push((url, e));
                }
            }
        }
        report.contents.sort_by(|a, b| a.url().cmp(b.url()));
        report.errors.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            "Scraped {} pages ({} cached), {} failed",
            report.contents.len(),
            report.cache_hits,
            report.errors.len()
        );
        report
    }

    async fn fetch_one(&self, url: &str, cancel: &CancellationToken) -> Result<(ScrapedContent, bool), ScrapeError> {
        let key = CacheLayer::key_for("fetch", &[("url", &normalize_url(url))]);
        if let Some(content) = self.cache.get::<ScrapedContent>(&key).await {
            return Ok((content, true));
        }

        let host = url_host(url).ok_or_else(|| ScrapeError::InvalidUrl(url.to_string()))?;
        let attempts = self.config.max_retries + 1;
        let mut last: Option<ScrapeError> = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }
            if !self.breaker_allows(&host) {
                return Err(ScrapeError::BreakerOpen(host));
            }

            match self.attempt(url, cancel).await {
                Ok(content) => {
                    self.breakers.entry(host.clone()).or_default().on_success();
                    self.cache.put(&key, &content, self.ttl).await;
                    return Ok((content, false));
                }
                Err(ScrapeError::Transport(TransportError::Cancelled)) => {
                    self.release_trial(&host);
                    return Err(ScrapeError::Cancelled);
                }
                Err(e) => {
                    if e.blames_host() {
                        self.record_host_failure(&host);
                    } else {
                        self.release_trial(&host);
                    }

                    if !e.is_retryable() {
                        return Err(e);
                    }
                    debug!("Attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                    last = Some(e);
                }
            }

            if attempt < attempts {
                let delay = self.backoff_delay(attempt);
                if cancel.run_until_cancelled(tokio::time::sleep(delay)).await.is_none() {
                    return Err(ScrapeError::Cancelled);
                }
            }
        }

        let last = last.map(|e| e.to_string()).unwrap_or_default();
        warn!("Giving up on {} after {} attempts: {}", url, attempts, last);
        Err(ScrapeError::Exhausted { attempts, last })
    }

    async fn attempt(&self, url: &str, cancel: &CancellationToken) -> Result<ScrapedContent, ScrapeError> {
        let mut lease = self.transport.acquire(cancel).await?;
        let response = self
            .transport
            .request(&mut lease, url, self.config.request_timeout(), cancel)
            .await?;

        if !response.is_success() {
            return Err(ScrapeError::Status(response.status));
        }

        let page = html_to_text(&response.body, self.config.max_content_chars);
        Ok(ScrapedContent::new(url, page.title, page.text, response.status, lease.session_id()))
    }

    /// `base * factor^(attempt-1)`, scaled by a random factor within ±jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.config.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let jitter = self.config.backoff_jitter;
        let scale = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        self.config.backoff_base().mul_f64((exp * scale).max(0.0))
    }

    fn breaker_allows(&self, host: &str) -> bool {
        self.breakers
            .entry(host.to_string())
            .or_default()
            .allow(Instant::now(), self.config.breaker_cooldown())
    }

    fn record_host_failure(&self, host: &str) {
        let opened = self
            .breakers
            .entry(host.to_string())
            .or_default()
            .on_failure(Instant::now(), self.config.breaker_threshold);
        if opened {
            warn!("Circuit breaker opened for host {}", host);
        }
    }

    fn release_trial(&self, host: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(host) {
            breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use umbra_core::TransportConfig;
    use umbra_tor::{AnonymityTransport, TransportResponse};
    use uuid::Uuid;

    /// Pages keyed by URL marker:
    /// - "flaky": fails twice then answers
    /// - "down.onion": every request fails until `down_recovered` is set
    /// - "missing": 404
    #[derive(Default)]
    struct SiteTransport {
        requests: AtomicUsize,
        flaky_calls: AtomicUsize,
        down_recovered: AtomicBool,
    }

    #[async_trait]
    impl AnonymityTransport for SiteTransport {
        async fn connect(&self, _circuit_id: Uuid) -> Result<(), TransportError> {
            Ok(())
        }

        async fn request(
            &self,
            _circuit_id: Uuid,
            url: &str,
            _timeout: Duration,
        ) -> Result<TransportResponse, TransportError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if url.contains("flaky") && self.flaky_calls.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(TransportError::Request("connection reset".to_string()));
            }
            if url.contains("down.onion") && !self.down_recovered.load(Ordering::SeqCst) {
                return Ok(TransportResponse {
                    status: 502,
                    body: String::new(),
                });
            }
            if url.contains("missing") {
                return Ok(TransportResponse {
                    status: 404,
                    body: String::new(),
                });
            }
            Ok(TransportResponse {
                status: 200,
                body: format!(
                    "<html><head><title>Page</title></head><body><p>content of {}</p><script>x()</script></body></html>",
                    url
                ),
            })
        }

        async fn close(&self, _circuit_id: Uuid) {}
    }

    fn test_config() -> ScrapeConfig {
        ScrapeConfig {
            backoff_base_ms: 1,
            backoff_jitter: 0.0,
            ..ScrapeConfig::default()
        }
    }

    fn orchestrator(site: Arc<SiteTransport>, config: ScrapeConfig) -> ScrapeOrchestrator {
        let transport_config = TransportConfig {
            session_retry_base_ms: 1,
            ..TransportConfig::default()
        };
        let manager = Arc::new(TransportManager::new(site, transport_config));
        ScrapeOrchestrator::new(manager, Arc::new(CacheLayer::in_memory()), config, Duration::from_secs(3600))
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fetch_dedups_and_sorts() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());

        let report = scraper
            .fetch(
                &urls(&["http://b.onion/x", "http://a.onion", "http://A.onion/"]),
                5,
                &CancellationToken::new(),
            )
            .await;

        assert!(report.errors.is_empty());
        let fetched: Vec<_> = report.contents.iter().map(|c| c.url()).collect();
        assert_eq!(fetched, vec!["http://a.onion", "http://b.onion/x"]);
        assert_eq!(report.contents[0].title(), Some("Page"));
        assert_eq!(report.contents[0].text(), "content of http://a.onion");
        assert_eq!(site.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_fetch_hits_cache() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());
        let cancel = CancellationToken::new();
        let list = urls(&["http://a.onion", "http://b.onion"]);

        let first = scraper.fetch(&list, 2, &cancel).await;
        let second = scraper.fetch(&list, 2, &cancel).await;

        assert_eq!(first.cache_hits, 0);
        assert_eq!(second.cache_hits, 2);
        assert_eq!(site.requests.load(Ordering::SeqCst), 2);
        assert_eq!(first.contents[0].content_hash(), second.contents[0].content_hash());
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());

        let report = scraper
            .fetch(&urls(&["http://flaky.onion"]), 1, &CancellationToken::new())
            .await;

        assert_eq!(report.contents.len(), 1);
        assert_eq!(site.requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());

        let report = scraper
            .fetch(&urls(&["http://down.onion/a"]), 1, &CancellationToken::new())
            .await;

        assert!(report.contents.is_empty());
        assert!(matches!(report.errors[0].1, ScrapeError::Exhausted { attempts: 4, .. }));
        assert_eq!(site.requests.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());

        let report = scraper
            .fetch(&urls(&["http://missing.onion"]), 1, &CancellationToken::new())
            .await;

        assert_eq!(report.errors, vec![("http://missing.onion".to_string(), ScrapeError::Status(404))]);
        assert_eq!(site.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_fails_fast() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());

        let report = scraper
            .fetch(
                &urls(&["http://down.onion/1", "http://down.onion/2", "http://down.onion/3"]),
                1,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.errors.len(), 3);
        // 4 attempts on the first URL, the 5th failure opens the breaker
        assert_eq!(site.requests.load(Ordering::SeqCst), 5);
        assert!(report
            .errors
            .iter()
            .any(|(_, e)| *e == ScrapeError::BreakerOpen("down.onion".to_string())));
    }

    #[tokio::test]
    async fn test_breaker_half_open_trial() {
        let site = Arc::new(SiteTransport::default());
        let config = ScrapeConfig {
            breaker_threshold: 2,
            breaker_cooldown_secs: 0,
            max_retries: 0,
            ..test_config()
        };
        let scraper = orchestrator(site.clone(), config);
        let cancel = CancellationToken::new();

        let report = scraper
            .fetch(&urls(&["http://down.onion/1", "http://down.onion/2"]), 1, &cancel)
            .await;
        assert_eq!(report.errors.len(), 2);

        site.down_recovered.store(true, Ordering::SeqCst);
        let report = scraper.fetch(&urls(&["http://down.onion/3"]), 1, &cancel).await;
        assert_eq!(report.contents.len(), 1);
    }

    #[test]
    fn test_host_breaker_states() {
        let cooldown = Duration::from_secs(120);
        let start = Instant::now();
        let mut breaker = HostBreaker::default();

        for _ in 0..4 {
            assert!(breaker.allow(start, cooldown));
            assert!(!breaker.on_failure(start, 5));
        }
        assert!(breaker.on_failure(start, 5));
        assert!(!breaker.allow(start + Duration::from_secs(60), cooldown));

        // half-open: exactly one trial
        let later = start + Duration::from_secs(121);
        assert!(breaker.allow(later, cooldown));
        assert!(!breaker.allow(later, cooldown));

        // failed trial restarts the cool-down
        breaker.on_failure(later, 5);
        assert!(!breaker.allow(later + Duration::from_secs(60), cooldown));
        assert!(breaker.allow(later + Duration::from_secs(121), cooldown));

        breaker.on_success();
        assert!(breaker.allow(later, cooldown));
    }

    #[tokio::test]
    async fn test_truncates_content() {
        let site = Arc::new(SiteTransport::default());
        let config = ScrapeConfig {
            max_content_chars: 7,
            ..test_config()
        };
        let scraper = orchestrator(site, config);

        let report = scraper
            .fetch(&urls(&["http://a.onion"]), 1, &CancellationToken::new())
            .await;
        assert_eq!(report.contents[0].text(), "content");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let site = Arc::new(SiteTransport::default());
        let scraper = orchestrator(site.clone(), test_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = scraper.fetch(&urls(&["http://a.onion"]), 1, &cancel).await;
        assert_eq!(report.errors[0].1, ScrapeError::Cancelled);
        assert_eq!(site.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_doubles_within_jitter() {
        let scraper = orchestrator(Arc::new(SiteTransport::default()), ScrapeConfig::default());

        for (attempt, nominal_ms) in [(1, 1000.0), (2, 2000.0), (3, 4000.0)] {
            for _ in 0..200 {
                let ms = scraper.backoff_delay(attempt).as_secs_f64() * 1000.0;
                assert!(
                    (nominal_ms * 0.8 - 1e-6..=nominal_ms * 1.2 + 1e-6).contains(&ms),
                    "attempt {} waited {}ms",
                    attempt,
                    ms
                );
            }
        }

        let exact = orchestrator(Arc::new(SiteTransport::default()), ScrapeConfig {
            backoff_jitter: 0.0,
            ..ScrapeConfig::default()
        });
        assert_eq!(exact.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(exact.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(exact.backoff_delay(3), Duration::from_secs(4));
    }
}
