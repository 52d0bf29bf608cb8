//! Search engine result page parsing
//!
//! Extracts onion result links from an engine's HTML response.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;

use umbra_core::{normalize_url, url_host, SearchResult};

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

static ONION_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[a-z0-9\.]+\.onion[^\s"'<>&]*"#).unwrap()
});

/// Parse search results from HTML.
///
/// Ranks follow document order after dropping duplicates and links back to
/// the engine itself (`engine_host`).
pub fn parse_search_results(
    html: &str,
    engine_name: &str,
    engine_host: Option<&str>,
    limit: usize,
) -> Vec<SearchResult> {
    let document = Html::parse_document(html);

    let mut seen: HashSet<String> = HashSet::new();
    let mut results = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        if results.len() >= limit {
            break;
        }

        let Some(href) = element.value().attr("href") else {
            continue;
        };

        // Redirect wrappers carry the target inside the query string
        let Some(m) = ONION_URL_REGEX.find(href) else {
            continue;
        };
        let url = m.as_str().to_string();

        // Skip search engine self-links
        let host = url_host(&url);
        if host.is_some() && host.as_deref() == engine_host {
            continue;
        }
        let lower = url.to_lowercase();
        if lower.contains("search?") || lower.contains("query=") {
            continue;
        }

        let title = element.text().collect::<Vec<_>>().join(" ");
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");

        // Skip empty or very short titles
        if title.chars().count() < 3 {
            continue;
        }

        if !seen.insert(normalize_url(&url)) {
            continue;
        }

        let rank = results.len();
        results.push(SearchResult::new(engine_name, &url, &title, rank));
    }

    results
}
