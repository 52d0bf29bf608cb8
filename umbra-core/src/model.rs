//! Investigation aggregate and the values flowing through the pipeline
//!
//! Stage components return these values; only the state machine that owns an
//! [`Investigation`] mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::{EntityKind, ExtractedEntity};

/// Lifecycle of an investigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Pending,
    Searching,
    Scraping,
    Analyzing,
    Summarizing,
    Completed,
    Failed,
}

impl InvestigationStatus {
    fn ordinal(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Searching => 1,
            Self::Scraping => 2,
            Self::Analyzing => 3,
            Self::Summarizing => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward moves one step at a time; `Failed` from any non-terminal state.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.ordinal() == self.ordinal() + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Searching => "searching",
            Self::Scraping => "scraping",
            Self::Analyzing => "analyzing",
            Self::Summarizing => "summarizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: InvestigationStatus,
    pub to: InvestigationStatus,
}

/// A result returned by a search engine, possibly merged across engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Engine that contributed the title/snippet
    pub engine: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Engine-reported position (0 = top)
    pub rank: usize,
    /// Merged rank-decay score across engines
    pub score: f64,
}

impl SearchResult {
    pub fn new(engine: &str, url: &str, title: &str, rank: usize) -> Self {
        Self {
            engine: engine.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            snippet: String::new(),
            rank,
            score: 0.0,
        }
    }

    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = snippet.to_string();
        self
    }

    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }
}

/// Content fetched from a single URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedContent {
    url: String,
    title: Option<String>,
    text: String,
    content_hash: String,
    status: u16,
    fetched_at: DateTime<Utc>,
    circuit_id: Uuid,
}

impl ScrapedContent {
    pub fn new(url: &str, title: Option<String>, text: String, status: u16, circuit_id: Uuid) -> Self {
        let content_hash = content_hash(&text);
        Self {
            url: url.to_string(),
            title,
            text,
            content_hash,
            status,
            fetched_at: Utc::now(),
            circuit_id,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn circuit_id(&self) -> Uuid {
        self.circuit_id
    }
}

/// SHA-256 hex digest of page text
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Canonical URL used as the merge key for search results and scrapes.
///
/// Lower-cases scheme and host, drops the fragment and trailing slashes.
/// Path and query keep their case.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    let (scheme, rest) = match without_fragment.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, without_fragment),
    };

    let (host, tail) = match rest.find(['/', '?']) {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    let mut normalized = String::with_capacity(without_fragment.len());
    if let Some(scheme) = scheme {
        normalized.push_str(&scheme);
        normalized.push_str("://");
    }
    normalized.push_str(&host.to_ascii_lowercase());
    normalized.push_str(tail.trim_end_matches('/'));
    normalized
}

/// Host part of a URL, lower-cased
pub fn url_host(url: &str) -> Option<String> {
    let rest = url.trim().split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Overall threat band derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=3 => Self::Low,
            4..=5 => Self::Medium,
            6..=8 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// One entity's share of the threat score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub indicator: String,
    pub kind: EntityKind,
    pub weight: f64,
}

/// Bounded severity assessment of an entity set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    /// Always within 1..=10
    pub score: u8,
    pub level: ThreatLevel,
    /// Sorted by descending weight
    pub contributions: Vec<Contribution>,
    pub rationale: String,
}

/// Error categories recorded against an investigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    Transport,
    Engine,
    EngineTimeout,
    Scrape,
    Cache,
    Summarizer,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A failure observed during one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: InvestigationStatus,
    pub kind: StageErrorKind,
    pub severity: Severity,
    /// Engine name or URL the error concerns
    pub subject: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: InvestigationStatus::Pending,
            kind,
            severity: Severity::Error,
            subject: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn warning(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::new(kind, message)
        }
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }
}

/// The unit of work tracked from query to assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    id: Uuid,
    query: String,
    status: InvestigationStatus,
    errors: Vec<StageError>,
    results: Vec<SearchResult>,
    contents: Vec<ScrapedContent>,
    entities: Vec<ExtractedEntity>,
    assessment: Option<ThreatAssessment>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Investigation {
    pub fn new(query: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query: query.trim().to_string(),
            status: InvestigationStatus::Pending,
            errors: Vec::new(),
            results: Vec::new(),
            contents: Vec::new(),
            entities: Vec::new(),
            assessment: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> InvestigationStatus {
        self.status
    }

    pub fn errors(&self) -> &[StageError] {
        &self.errors
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn contents(&self) -> &[ScrapedContent] {
        &self.contents
    }

    pub fn entities(&self) -> &[ExtractedEntity] {
        &self.entities
    }

    pub fn assessment(&self) -> Option<&ThreatAssessment> {
        self.assessment.as_ref()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StageError> {
        self.errors.iter().filter(|e| e.severity == Severity::Warning)
    }

    pub fn transition(&mut self, next: InvestigationStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Move to `Failed`, keeping partial results. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = InvestigationStatus::Failed;
            self.touch();
        }
    }

    /// Attach an error, stamped with the current stage
    pub fn record_error(&mut self, mut error: StageError) {
        error.stage = self.status;
        self.errors.push(error);
        self.touch();
    }

    /// Merge results by normalized URL, keeping the higher score.
    ///
    /// Resulting order is descending score, ties by normalized URL.
    pub fn merge_results(&mut self, incoming: Vec<SearchResult>) {
        let mut by_url: HashMap<String, SearchResult> = self
            .results
            .drain(..)
            .map(|r| (r.normalized_url(), r))
            .collect();

        for result in incoming {
            let key = result.normalized_url();
            match by_url.get(&key) {
                Some(existing) if existing.score >= result.score => {}
                _ => {
                    by_url.insert(key, result);
                }
            }
        }

        let mut merged: Vec<(String, SearchResult)> = by_url.into_iter().collect();
        merged.sort_by(|(ka, a), (kb, b)| b.score.total_cmp(&a.score).then_with(|| ka.cmp(kb)));
        self.results = merged.into_iter().map(|(_, r)| r).collect();
        self.touch();
    }

    /// Add scraped content; a URL already present is ignored
    pub fn add_contents(&mut self, incoming: Vec<ScrapedContent>) {
        for content in incoming {
            let key = normalize_url(content.url());
            if !self.contents.iter().any(|c| normalize_url(c.url()) == key) {
                self.contents.push(content);
            }
        }
        self.contents.sort_by(|a, b| a.url().cmp(b.url()));
        self.touch();
    }

    pub fn set_entities(&mut self, entities: Vec<ExtractedEntity>) {
        self.entities = entities;
        self.touch();
    }

    pub fn set_assessment(&mut self, assessment: ThreatAssessment) {
        self.assessment = Some(assessment);
        self.touch();
    }

    pub fn set_summary(&mut self, summary: String) {
        self.summary = Some(summary);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut inv = Investigation::new("ransomware payments");
        assert_eq!(inv.status(), InvestigationStatus::Pending);
        inv.transition(InvestigationStatus::Searching).unwrap();
        inv.transition(InvestigationStatus::Scraping).unwrap();

        let err = inv.transition(InvestigationStatus::Searching).unwrap_err();
        assert_eq!(err.from, InvestigationStatus::Scraping);

        // skipping a stage is rejected too
        assert!(inv.transition(InvestigationStatus::Summarizing).is_err());
    }

    #[test]
    fn test_failed_from_any_non_terminal() {
        let mut inv = Investigation::new("q");
        inv.transition(InvestigationStatus::Searching).unwrap();
        inv.merge_results(vec![SearchResult::new("a", "http://x.onion", "X", 0)]);
        inv.transition(InvestigationStatus::Failed).unwrap();

        assert_eq!(inv.results().len(), 1);
        assert!(inv.transition(InvestigationStatus::Scraping).is_err());
        assert!(inv.transition(InvestigationStatus::Failed).is_err());
    }

    #[test]
    fn test_merge_results_keeps_highest_score() {
        let mut inv = Investigation::new("q");
        let mut low = SearchResult::new("a", "http://Site.onion/page/", "low", 3);
        low.score = 0.25;
        let mut high = SearchResult::new("b", "http://site.onion/page", "high", 0);
        high.score = 1.0;
        let mut other = SearchResult::new("a", "http://other.onion", "other", 1);
        other.score = 0.5;

        inv.merge_results(vec![low, other]);
        inv.merge_results(vec![high]);

        assert_eq!(inv.results().len(), 2);
        assert_eq!(inv.results()[0].title, "high");
        assert_eq!(inv.results()[1].title, "other");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTP://ABC.onion/Path/?q=1#frag"),
            "http://abc.onion/Path/?q=1"
        );
        assert_eq!(normalize_url("http://abc.onion/"), "http://abc.onion");
        assert_eq!(normalize_url("  http://abc.onion///  "), "http://abc.onion");
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("http://User@Abc.onion:80/x").as_deref(), Some("abc.onion"));
        assert_eq!(url_host("abc.onion/path").as_deref(), Some("abc.onion"));
        assert_eq!(url_host("http:///nohost"), None);
    }

    #[test]
    fn test_scraped_content_hash() {
        let a = ScrapedContent::new("http://a.onion", None, "hello".into(), 200, Uuid::new_v4());
        let b = ScrapedContent::new("http://b.onion", None, "hello".into(), 200, Uuid::new_v4());
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn test_record_error_stamps_stage() {
        let mut inv = Investigation::new("q");
        inv.transition(InvestigationStatus::Searching).unwrap();
        inv.record_error(StageError::new(StageErrorKind::Engine, "boom").with_subject("ahmia"));
        inv.record_error(StageError::warning(StageErrorKind::Transport, "degraded"));

        assert_eq!(inv.errors()[0].stage, InvestigationStatus::Searching);
        assert_eq!(inv.errors()[0].subject.as_deref(), Some("ahmia"));
        assert_eq!(inv.warnings().count(), 1);
    }

    #[test]
    fn test_threat_level_bands() {
        assert_eq!(ThreatLevel::from_score(1), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(5), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(8), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(10), ThreatLevel::Critical);
    }
}
