//! Investigation State Machine
//!
//! Drives an [`Investigation`] through
//! `Pending → Searching → Scraping → Analyzing → Summarizing → Completed`,
//! recording every stage failure on the aggregate. Any non-terminal stage may
//! end in `Failed`; partial results are kept.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use umbra_core::{
    entities, score, CacheLayer, CancellationToken, EntityLedger, Investigation, InvestigationStatus,
    StageError, StageErrorKind, UmbraConfig,
};
use umbra_stages::{
    CapabilityRegistry, DispatchError, EngineError, RegistryError, ScrapeError, ScrapeOrchestrator,
    SearchDispatcher, SharedEngine, Summarizer, SummarizerError,
};
use umbra_tor::{TransportHealth, TransportManager};

/// Errors that prevent an investigation from being driven at all
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Investigation {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: InvestigationStatus },
}

/// Sequences the stages and owns every mutation of the investigation
pub struct InvestigationRunner {
    config: UmbraConfig,
    transport: Arc<TransportManager>,
    dispatcher: SearchDispatcher,
    scraper: ScrapeOrchestrator,
    engines: Vec<SharedEngine>,
    summarizer: Option<Summarizer>,
}

impl InvestigationRunner {
    pub fn new(
        config: UmbraConfig,
        transport: Arc<TransportManager>,
        cache: Arc<CacheLayer>,
        registry: &CapabilityRegistry,
    ) -> Result<Self, RuntimeError> {
        let engines = registry.select_engines(&config.search.engines)?;

        let summarizer = if config.summarizer.enabled {
            registry
                .select_backend(config.summarizer.provider.as_deref())?
                .map(|backend| Summarizer::new(backend, config.summarizer.clone()))
        } else {
            None
        };

        let dispatcher = SearchDispatcher::new(cache.clone(), config.search.clone(), config.cache.search_ttl());
        let scraper = ScrapeOrchestrator::new(
            transport.clone(),
            cache,
            config.scrape.clone(),
            config.cache.content_ttl(),
        );

        info!(
            "Runner ready: {} engines, summarizer {}",
            engines.len(),
            summarizer.as_ref().map(|s| s.model_name()).unwrap_or("disabled")
        );

        Ok(Self {
            config,
            transport,
            dispatcher,
            scraper,
            engines,
            summarizer,
        })
    }

    pub fn transport_health(&self) -> TransportHealth {
        self.transport.health()
    }

    /// Start a new investigation and drive it to a terminal state
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> Investigation {
        self.drive(Investigation::new(query), cancel).await
    }

    /// Continue a persisted investigation from its current status
    pub async fn resume(
        &self,
        investigation: Investigation,
        cancel: &CancellationToken,
    ) -> Result<Investigation, RuntimeError> {
        if investigation.status().is_terminal() {
            return Err(RuntimeError::AlreadyTerminal {
                id: investigation.id(),
                status: investigation.status(),
            });
        }
        info!("Resuming investigation {} at {}", investigation.id(), investigation.status());
        Ok(self.drive(investigation, cancel).await)
    }

    async fn drive(&self, mut inv: Investigation, cancel: &CancellationToken) -> Investigation {
        info!("Investigation {} ({}): {}", inv.id(), inv.status(), inv.query());

        while !inv.status().is_terminal() {
            if cancel.is_cancelled() {
                self.cancelled(&mut inv);
                break;
            }

            match inv.status() {
                InvestigationStatus::Pending => self.advance(&mut inv, InvestigationStatus::Searching),
                InvestigationStatus::Searching => self.search(&mut inv, cancel).await,
                InvestigationStatus::Scraping => self.scrape(&mut inv, cancel).await,
                InvestigationStatus::Analyzing => self.analyze(&mut inv),
                InvestigationStatus::Summarizing => self.summarize(&mut inv, cancel).await,
                InvestigationStatus::Completed | InvestigationStatus::Failed => {}
            }
        }

        match inv.status() {
            InvestigationStatus::Completed => info!(
                "Investigation {} completed: {} results, {} pages, {} entities, {} warnings",
                inv.id(),
                inv.results().len(),
                inv.contents().len(),
                inv.entities().len(),
                inv.warnings().count()
            ),
            status => error!(
                "Investigation {} ended {} with {} errors",
                inv.id(),
                status,
                inv.errors().len()
            ),
        }
        inv
    }

    async fn search(&self, inv: &mut Investigation, cancel: &CancellationToken) {
        let query = inv.query().to_string();
        let outcome = self
            .dispatcher
            .dispatch(
                &query,
                &self.engines,
                self.config.search.limit,
                self.config.search.engine_timeout(),
                cancel,
            )
            .await;

        match outcome {
            Ok(report) => {
                for (engine, e) in report.errors {
                    inv.record_error(engine_error(&engine, e, true));
                }
                info!("Search found {} results from {} engines", report.results.len(), report.succeeded);
                inv.merge_results(report.results);
                self.note_transport(inv);
                self.advance(inv, InvestigationStatus::Scraping);
            }
            Err(DispatchError::Cancelled) => self.cancelled(inv),
            Err(DispatchError::AllEnginesFailed(errors)) => {
                for (engine, e) in errors {
                    inv.record_error(engine_error(&engine, e, false));
                }
                self.note_transport(inv);
                error!("Every search engine failed");
                inv.fail();
            }
            Err(DispatchError::NoEngines) => {
                inv.record_error(StageError::new(StageErrorKind::Engine, "no search engines selected"));
                inv.fail();
            }
        }
    }

    async fn scrape(&self, inv: &mut Investigation, cancel: &CancellationToken) {
        let already: HashSet<String> = inv.contents().iter().map(|c| umbra_core::normalize_url(c.url())).collect();
        let urls: Vec<String> = inv
            .results()
            .iter()
            .take(self.config.scrape.max_urls)
            .filter(|r| !already.contains(&r.normalized_url()))
            .map(|r| r.url.clone())
            .collect();

        let report = self.scraper.fetch(&urls, self.config.scrape.concurrency, cancel).await;

        for (url, e) in report.errors {
            if e == ScrapeError::Cancelled {
                continue;
            }
            inv.record_error(StageError::warning(StageErrorKind::Scrape, e.to_string()).with_subject(&url));
        }
        inv.add_contents(report.contents);

        if cancel.is_cancelled() {
            self.cancelled(inv);
            return;
        }
        self.note_transport(inv);

        if inv.contents().is_empty() {
            inv.record_error(StageError::new(
                StageErrorKind::Scrape,
                format!("no content retrieved from {} URLs", urls.len()),
            ));
            error!("Nothing could be scraped");
            inv.fail();
            return;
        }

        self.advance(inv, InvestigationStatus::Analyzing);
    }

    /// Extraction and scoring are local and cannot fail
    fn analyze(&self, inv: &mut Investigation) {
        let mut seen_hashes = HashSet::new();
        let mut ledger = EntityLedger::new();

        for content in inv.contents() {
            if !seen_hashes.insert(content.content_hash().to_string()) {
                debug!("Skipping mirrored content at {}", content.url());
                continue;
            }
            ledger.absorb(entities::extract(content));
        }

        let extracted = ledger.into_entities();
        let assessment = score(&extracted);
        info!(
            "Extracted {} entities, threat score {}/10 ({:?})",
            extracted.len(),
            assessment.score,
            assessment.level
        );

        inv.set_entities(extracted);
        inv.set_assessment(assessment);
        self.advance(inv, InvestigationStatus::Summarizing);
    }

    async fn summarize(&self, inv: &mut Investigation, cancel: &CancellationToken) {
        match &self.summarizer {
            None => debug!("Summarizer disabled, skipping"),
            Some(summarizer) => {
                let outcome = summarizer
                    .summarize(inv.query(), inv.contents(), inv.entities(), inv.assessment(), cancel)
                    .await;
                match outcome {
                    Ok(summary) => inv.set_summary(summary),
                    Err(SummarizerError::Cancelled) => {
                        self.cancelled(inv);
                        return;
                    }
                    Err(e) => {
                        warn!("Summarizer failed: {}", e);
                        inv.record_error(StageError::warning(StageErrorKind::Summarizer, e.to_string()));
                    }
                }
            }
        }
        self.advance(inv, InvestigationStatus::Completed);
    }

    fn advance(&self, inv: &mut Investigation, next: InvestigationStatus) {
        match inv.transition(next) {
            Ok(()) => info!("Investigation {} -> {}", inv.id(), next),
            Err(e) => {
                error!("Investigation {}: {}", inv.id(), e);
                inv.fail();
            }
        }
    }

    fn cancelled(&self, inv: &mut Investigation) {
        warn!("Investigation {} cancelled at {}", inv.id(), inv.status());
        inv.record_error(StageError::new(StageErrorKind::Cancelled, "investigation cancelled"));
        inv.fail();
    }

    fn note_transport(&self, inv: &mut Investigation) {
        if self.transport.is_degraded() {
            inv.record_error(StageError::warning(
                StageErrorKind::Transport,
                "transport is in degraded mode; circuit creation is failing",
            ));
        }
    }
}

fn engine_error(engine: &str, e: EngineError, partial: bool) -> StageError {
    let kind = match e {
        EngineError::Timeout(_) => StageErrorKind::EngineTimeout,
        EngineError::Failed(_) => StageErrorKind::Engine,
        EngineError::Cancelled => StageErrorKind::Cancelled,
    };
    let error = if partial {
        StageError::warning(kind, e.to_string())
    } else {
        StageError::new(kind, e.to_string())
    };
    error.with_subject(engine)
}
