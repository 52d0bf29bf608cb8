//! Investigation summarizer
//!
//! Builds an analyst prompt from the scraped sources, the extracted entities
//! and the threat assessment, then asks a completion backend for a report.

use thiserror::Error;
use tracing::info;

use umbra_core::{CancellationToken, ExtractedEntity, ScrapedContent, SummarizerConfig, ThreatAssessment};
use umbra_tor::truncate_chars;

use crate::{CompletionOptions, LlmError, SharedBackend};

/// System prompt for intelligence analysis
const ANALYST_SYSTEM_PROMPT: &str = r#"
You are a Cybercrime Threat Intelligence Expert tasked with generating investigative insights from dark web OSINT data.

Rules:
1. Analyze the provided dark web data (URLs, content, indicators, threat score)
2. Output source links referenced for analysis
3. Provide detailed, evidence-based technical analysis
4. List intelligence indicators with context (emails, crypto addresses, domains, credentials)
5. Generate 3-5 key insights that are specific, actionable, and data-driven
6. Include suggested next steps for further investigation
7. Be objective and analytical
8. Ignore NSFW content

Output Format:
# Investigation Summary

## Input Query
{query}

## Source Links Referenced
- [list sources]

## Intelligence Indicators
- [categorized indicators with context]

## Key Insights
1. [insight with evidence]
2. [insight with evidence]
...

## Next Steps
- [recommended actions]
- [follow-up queries]
"#;

#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("Completion failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Summarizer timed out")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("Nothing to summarize")]
    NoContent,
}

pub struct Summarizer {
    backend: SharedBackend,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(backend: SharedBackend, config: SummarizerConfig) -> Self {
        Self { backend, config }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub async fn summarize(
        &self,
        query: &str,
        contents: &[ScrapedContent],
        entities: &[ExtractedEntity],
        assessment: Option<&ThreatAssessment>,
        cancel: &CancellationToken,
    ) -> Result<String, SummarizerError> {
        if contents.is_empty() && entities.is_empty() {
            return Err(SummarizerError::NoContent);
        }

        let prompt = self.build_prompt(contents, entities, assessment);
        let options = CompletionOptions::default().with_system(&ANALYST_SYSTEM_PROMPT.replace("{query}", query));

        info!(
            "Summarizing {} sources, {} entities with {}",
            contents.len().min(self.config.max_sources),
            entities.len().min(self.config.max_entities),
            self.backend.model_name()
        );

        let call = tokio::time::timeout(self.config.timeout(), self.backend.complete(&prompt, &options));
        match cancel.run_until_cancelled(call).await {
            None => Err(SummarizerError::Cancelled),
            Some(Err(_elapsed)) => Err(SummarizerError::Timeout),
            Some(Ok(result)) => Ok(result?.trim().to_string()),
        }
    }

    fn build_prompt(
        &self,
        contents: &[ScrapedContent],
        entities: &[ExtractedEntity],
        assessment: Option<&ThreatAssessment>,
    ) -> String {
        let mut input = String::from("INPUT DATA:\n\n");

        if let Some(assessment) = assessment {
            input.push_str(&format!(
                "## Threat Assessment\n\nScore {}/10 ({:?})\n{}\n\n",
                assessment.score, assessment.level, assessment.rationale
            ));
        }

        input.push_str("## Scraped Content\n\n");
        for content in contents.iter().take(self.config.max_sources) {
            // Truncate text for LLM context limits
            let (text, truncated) = truncate_chars(content.text(), self.config.max_chars_per_source);
            let ellipsis = if truncated { "..." } else { "" };
            input.push_str(&format!("### {}\n{}{}\n\n", content.url(), text, ellipsis));
        }

        input.push_str("## Extracted Indicators\n\n");
        let mut ranked: Vec<&ExtractedEntity> = entities.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then_with(|| a.value.cmp(&b.value)));
        for entity in ranked.into_iter().take(self.config.max_entities) {
            input.push_str(&format!(
                "- {}: {} (confidence: {:.2}, sources: {})\n",
                entity.kind,
                entity.value,
                entity.confidence,
                entity.sources.len()
            ));
        }

        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmCompletion;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use umbra_core::EntityKind;
    use uuid::Uuid;

    #[derive(Default)]
    struct MockBackend {
        prompts: Mutex<Vec<String>>,
        fail: bool,
        hang: bool,
    }

    #[async_trait]
    impl LlmCompletion for MockBackend {
        async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String, LlmError> {
            assert!(options.system.as_deref().is_some_and(|s| s.contains("## Input Query")));
            self.prompts.lock().push(prompt.to_string());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(LlmError::RateLimited);
            }
            Ok("  # Investigation Summary\n...  ".to_string())
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    fn content(url: &str, text: &str) -> ScrapedContent {
        ScrapedContent::new(url, None, text.to_string(), 200, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_summarize_builds_bounded_prompt() {
        let backend = Arc::new(MockBackend::default());
        let config = SummarizerConfig {
            max_sources: 1,
            max_chars_per_source: 4,
            ..SummarizerConfig::default()
        };
        let summarizer = Summarizer::new(backend.clone(), config);
        let entities = vec![ExtractedEntity::new(EntityKind::Email, "a@b.net".to_string(), "http://a.onion")];

        let summary = summarizer
            .summarize(
                "leaks",
                &[content("http://a.onion", "abcdefgh"), content("http://b.onion", "zzz")],
                &entities,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary, "# Investigation Summary\n...");
        let prompt = backend.prompts.lock()[0].clone();
        assert!(prompt.contains("### http://a.onion\nabcd...\n"));
        assert!(!prompt.contains("http://b.onion"));
        assert!(prompt.contains("- email: a@b.net (confidence: 0.90, sources: 1)"));
    }

    #[tokio::test]
    async fn test_summarize_errors() {
        let failing = Summarizer::new(
            Arc::new(MockBackend {
                fail: true,
                ..MockBackend::default()
            }),
            SummarizerConfig::default(),
        );
        let cancel = CancellationToken::new();
        let docs = [content("http://a.onion", "text")];

        assert!(matches!(
            failing.summarize("q", &docs, &[], None, &cancel).await,
            Err(SummarizerError::Llm(LlmError::RateLimited))
        ));
        assert!(matches!(
            failing.summarize("q", &[], &[], None, &cancel).await,
            Err(SummarizerError::NoContent)
        ));

        let slow = Summarizer::new(
            Arc::new(MockBackend {
                hang: true,
                ..MockBackend::default()
            }),
            SummarizerConfig {
                timeout_secs: 0,
                ..SummarizerConfig::default()
            },
        );
        assert!(matches!(
            slow.summarize("q", &docs, &[], None, &cancel).await,
            Err(SummarizerError::Timeout)
        ));
    }
}
