//! Search Dispatcher
//!
//! Fans one query out to every selected engine concurrently, each under its
//! own timeout, then merges the answers into a single ranked list.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use umbra_core::{CacheLayer, CancellationToken, SearchConfig, SearchResult};

use crate::{EngineError, SharedEngine};

#[derive(Debug, Error, PartialEq)]
pub enum DispatchError {
    #[error("No search engines selected")]
    NoEngines,

    #[error("All {} search engines failed", .0.len())]
    AllEnginesFailed(Vec<(String, EngineError)>),

    #[error("Cancelled")]
    Cancelled,
}

/// Outcome of a dispatch with at least one engine answering
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    /// Merged, ranked, truncated
    pub results: Vec<SearchResult>,
    /// Failed engines, by engine name
    pub errors: Vec<(String, EngineError)>,
    pub succeeded: usize,
    pub cache_hits: usize,
}

struct EngineOutcome {
    name: String,
    weight: f64,
    result: Result<Vec<SearchResult>, EngineError>,
    cached: bool,
}

pub struct SearchDispatcher {
    cache: Arc<CacheLayer>,
    config: SearchConfig,
    ttl: Duration,
}

impl SearchDispatcher {
    pub fn new(cache: Arc<CacheLayer>, config: SearchConfig, ttl: Duration) -> Self {
        Self { cache, config, ttl }
    }

    /// Weight override from config, else the engine's own
    fn weight_of(&self, engine: &SharedEngine) -> f64 {
        self.config
            .engine_weights
            .get(engine.name())
            .copied()
            .unwrap_or_else(|| engine.weight())
    }

    pub async fn dispatch(
        &self,
        query: &str,
        engines: &[SharedEngine],
        limit: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        if engines.is_empty() {
            return Err(DispatchError::NoEngines);
        }

        info!("Dispatching query to {} engines", engines.len());

        let per_engine_limit = self.config.per_engine_limit.max(limit);
        let outcomes: Vec<EngineOutcome> = stream::iter(engines.iter().cloned())
            .map(|engine| self.run_engine(engine, query, per_engine_limit, timeout, cancel))
            .buffer_unordered(self.config.max_concurrent_engines.max(1))
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let mut errors = Vec::new();
        let mut successes = Vec::new();
        let mut cache_hits = 0;
        for outcome in outcomes {
            match outcome.result {
                Ok(results) => {
                    if outcome.cached {
                        cache_hits += 1;
                    }
                    successes.push((outcome.name, outcome.weight, results));
                }
                Err(e) => {
                    warn!("Engine {} failed: {}", outcome.name, e);
                    errors.push((outcome.name, e));
                }
            }
        }
        errors.sort_by(|a, b| a.0.cmp(&b.0));

        if successes.is_empty() {
            return Err(DispatchError::AllEnginesFailed(errors));
        }

        let succeeded = successes.len();
        let results = merge_results(successes, limit);
        info!(
            "Dispatch merged {} results ({} engines ok, {} failed, {} cached)",
            results.len(),
            succeeded,
            errors.len(),
            cache_hits
        );

        Ok(DispatchReport {
            results,
            errors,
            succeeded,
            cache_hits,
        })
    }

    async fn run_engine(
        &self,
        engine: SharedEngine,
        query: &str,
        limit: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> EngineOutcome {
        let name = engine.name().to_string();
        let weight = self.weight_of(&engine);
        let limit_param = limit.to_string();
        let key = CacheLayer::key_for(
            "search",
            &[("query", query), ("engine", &name), ("limit", &limit_param)],
        );

        if let Some(results) = self.cache.get::<Vec<SearchResult>>(&key).await {
            debug!("Engine {} served from cache", name);
            return EngineOutcome {
                name,
                weight,
                result: Ok(results),
                cached: true,
            };
        }

        let call = tokio::time::timeout(timeout, engine.search(query, limit, timeout, cancel));
        let result = match cancel.run_until_cancelled(call).await {
            None => Err(EngineError::Cancelled),
            Some(Err(_elapsed)) => Err(EngineError::Timeout(timeout)),
            Some(Ok(result)) => result,
        };

        if let Ok(results) = &result {
            self.cache.put(&key, results, self.ttl).await;
        }

        EngineOutcome {
            name,
            weight,
            result,
            cached: false,
        }
    }
}

/// Merge per-engine answers by normalized URL.
///
/// Each engine adds `weight / (1 + rank)` once per URL, using its best rank
/// for that URL; the best single contribution supplies engine, title and
/// snippet. Inputs are folded in engine-name order so the float sums do not
/// depend on arrival order.
pub fn merge_results(mut per_engine: Vec<(String, f64, Vec<SearchResult>)>, limit: usize) -> Vec<SearchResult> {
    per_engine.sort_by(|a, b| a.0.cmp(&b.0));

    // url -> (merged, best contribution)
    let mut merged: HashMap<String, (SearchResult, f64)> = HashMap::new();

    for (engine, weight, results) in per_engine {
        let mut best_per_url: BTreeMap<String, SearchResult> = BTreeMap::new();
        for result in results {
            match best_per_url.get(&result.normalized_url()) {
                Some(kept) if kept.rank <= result.rank => {}
                _ => {
                    best_per_url.insert(result.normalized_url(), result);
                }
            }
        }

        for (key, result) in best_per_url {
            let contribution = weight / (1.0 + result.rank as f64);

            match merged.get_mut(&key) {
                Some((existing, best)) => {
                    existing.score += contribution;
                    if contribution > *best {
                        *best = contribution;
                        existing.engine = engine.clone();
                        existing.title = result.title;
                        existing.snippet = result.snippet;
                        existing.rank = result.rank;
                    }
                }
                None => {
                    let entry = SearchResult {
                        engine: engine.clone(),
                        score: contribution,
                        ..result
                    };
                    merged.insert(key, (entry, contribution));
                }
            }
        }
    }

    let mut ranked: Vec<(String, SearchResult)> = merged.into_iter().map(|(k, (r, _))| (k, r)).collect();
    ranked.sort_by(|(ka, a), (kb, b)| b.score.total_cmp(&a.score).then_with(|| ka.cmp(kb)));
    ranked.truncate(limit);
    ranked.into_iter().map(|(_, r)| r).collect()
}
