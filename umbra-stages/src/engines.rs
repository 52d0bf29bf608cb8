//! Search engine adapters
//!
//! A [`SearchEngineProvider`] answers one query with ranked results. The
//! production adapter fetches an onion engine's result page through the
//! circuit pool and parses its links.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use umbra_core::{url_host, CancellationToken, SearchEngine, SearchResult};
use umbra_tor::{parse_search_results, TransportError, TransportManager};

/// Errors from a single engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine failed: {0}")]
    Failed(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<TransportError> for EngineError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(d) => Self::Timeout(d),
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// A search backend reachable through the transport
#[async_trait]
pub trait SearchEngineProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Merge weight when no override is configured
    fn weight(&self) -> f64 {
        1.0
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, EngineError>;
}

pub type SharedEngine = Arc<dyn SearchEngineProvider>;

/// Registry engine fetched over Tor
pub struct OnionSearchEngine {
    engine: &'static SearchEngine,
    host: Option<String>,
    transport: Arc<TransportManager>,
}

impl OnionSearchEngine {
    pub fn new(engine: &'static SearchEngine, transport: Arc<TransportManager>) -> Self {
        Self {
            engine,
            host: url_host(engine.url_template),
            transport,
        }
    }
}

#[async_trait]
impl SearchEngineProvider for OnionSearchEngine {
    fn name(&self) -> &str {
        self.engine.name
    }

    fn weight(&self) -> f64 {
        self.engine.weight
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let url = self.engine.build_url(query);
        debug!("Crawling {} with query: {}", self.engine.name, query);

        let mut lease = self.transport.acquire(cancel).await?;
        let response = self.transport.request(&mut lease, &url, timeout, cancel).await?;

        if !response.is_success() {
            return Err(EngineError::Failed(format!("HTTP status {}", response.status)));
        }

        let results = parse_search_results(&response.body, self.engine.name, self.host.as_deref(), limit);
        debug!("Engine {} returned {} results", self.engine.name, results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::{find_engine, TransportConfig};
    use umbra_tor::{AnonymityTransport, TransportResponse};
    use uuid::Uuid;

    struct PageTransport {
        status: u16,
        body: String,
    }

    #[async_trait]
    impl AnonymityTransport for PageTransport {
        async fn connect(&self, _circuit_id: Uuid) -> Result<(), TransportError> {
            Ok(())
        }

        async fn request(
            &self,
            _circuit_id: Uuid,
            url: &str,
            _timeout: Duration,
        ) -> Result<TransportResponse, TransportError> {
            assert!(url.contains("q=leaked+databases"));
            Ok(TransportResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }

        async fn close(&self, _circuit_id: Uuid) {}
    }

    fn engine_with(status: u16, body: &str) -> OnionSearchEngine {
        let transport = Arc::new(PageTransport {
            status,
            body: body.to_string(),
        });
        let manager = Arc::new(TransportManager::new(transport, TransportConfig::default()));
        OnionSearchEngine::new(find_engine("Ahmia").unwrap(), manager)
    }

    #[tokio::test]
    async fn test_onion_engine_parses_results() {
        let engine = engine_with(
            200,
            r#"<html><body>
                <a href="http://leaks1234567890abcdef.onion/db">Leaked DB index</a>
                <a href="http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/about">About Ahmia</a>
            </body></html>"#,
        );

        let results = engine
            .search("leaked databases", 10, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].engine, "Ahmia");
        assert_eq!(engine.weight(), 1.0);
    }

    #[tokio::test]
    async fn test_onion_engine_http_error() {
        let engine = engine_with(503, "");
        let err = engine
            .search("leaked databases", 10, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::Failed("HTTP status 503".to_string()));
    }

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(EngineError::from(TransportError::Cancelled), EngineError::Cancelled);
        assert_eq!(
            EngineError::from(TransportError::Timeout(Duration::from_secs(3))),
            EngineError::Timeout(Duration::from_secs(3))
        );
    }
}
