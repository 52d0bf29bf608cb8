//! HTML to text conversion for fetched pages

use scraper::node::Node;
use scraper::{Html, Selector};
use std::sync::LazyLock;

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

/// Readable text of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: Option<String>,
    pub text: String,
    /// Text was cut at `max_chars`
    pub truncated: bool,
}

/// Convert a page to normalized text, keeping at most `max_chars` characters
pub fn html_to_text(html: &str, max_chars: usize) -> PageText {
    let (title, text) = extract_content(html);
    let (text, truncated) = truncate_chars(&text, max_chars);
    PageText {
        title,
        text,
        truncated,
    }
}

/// Extract title and text content from HTML
pub fn extract_content(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let text = match document.select(&BODY_SELECTOR).next() {
        Some(body) => {
            let mut text_parts = Vec::new();

            // Walk all descendants, skip script/style/noscript subtrees
            for node_ref in body.descendants() {
                if let Node::Text(text_node) = node_ref.value() {
                    let in_excluded = node_ref.ancestors().any(|ancestor| {
                        ancestor
                            .value()
                            .as_element()
                            .map(|el| matches!(el.name(), "script" | "style" | "noscript"))
                            .unwrap_or(false)
                    });

                    if !in_excluded {
                        let trimmed = text_node.trim();
                        if !trimmed.is_empty() {
                            text_parts.push(trimmed);
                        }
                    }
                }
            }

            normalize_whitespace(&text_parts.join(" "))
        }
        // plain-text responses
        None => normalize_whitespace(html),
    };

    (title, text)
}

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut to at most `max_chars` characters without splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let html = r#"
            <html>
            <head><title>Test   Page</title></head>
            <body>
                <script>var x = 1;</script>
                <h1>Hello World</h1>
                <p>This is test content.</p>
                <noscript>enable js</noscript>
                <style>.x { color: red; }</style>
            </body>
            </html>
        "#;

        let (title, text) = extract_content(html);

        assert_eq!(title, Some("Test Page".to_string()));
        assert_eq!(text, "Hello World This is test content.");
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  hello   world  \n\t  test  ";
        let output = normalize_whitespace(input);
        assert_eq!(output, "hello world test");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let (text, truncated) = truncate_chars("ünïcødé text", 5);
        assert_eq!(text, "ünïcø");
        assert!(truncated);

        let (text, truncated) = truncate_chars("short", 5);
        assert_eq!(text, "short");
        assert!(!truncated);
    }

    #[test]
    fn test_html_to_text_limit() {
        let html = format!("<html><body><p>{}</p></body></html>", "ab ".repeat(100));
        let page = html_to_text(&html, 10);
        assert_eq!(page.text.chars().count(), 10);
        assert!(page.truncated);
        assert_eq!(page.title, None);
    }
}
