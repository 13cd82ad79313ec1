//! Default ingestor for blog posts given as URL, markdown or plain text.

use super::normalize::{normalize_text, strip_markdown};
use super::{Ingestor, SourceContent, SourceRef};
use crate::error::{BlogcastError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Line width handed to html2text; wide enough that paragraphs are not wrapped.
const HTML_TEXT_WIDTH: usize = 10_000;

/// Fetches and normalizes blog content.
pub struct BlogIngestor {
    client: reqwest::Client,
    title_regex: Regex,
    h1_regex: Regex,
    tag_regex: Regex,
}

impl BlogIngestor {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("blogcast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BlogcastError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            title_regex: Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("Invalid regex"),
            h1_regex: Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("Invalid regex"),
            tag_regex: Regex::new(r"<[^>]+>").expect("Invalid regex"),
        })
    }

    /// Page title, preferring the first `<h1>` over `<title>`.
    fn extract_title(&self, html: &str) -> Option<String> {
        self.h1_regex
            .captures(html)
            .or_else(|| self.title_regex.captures(html))
            .map(|c| normalize_text(&self.tag_regex.replace_all(&c[1], "")))
            .filter(|t| !t.is_empty())
    }

    /// Narrow to the `<article>` element when the page has one.
    fn article_html<'a>(&self, html: &'a str) -> &'a str {
        let lower = html.to_ascii_lowercase();
        match (lower.find("<article"), lower.rfind("</article>")) {
            (Some(start), Some(end)) if end > start => &html[start..end + "</article>".len()],
            _ => html,
        }
    }

    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<(Option<String>, String)> {
        info!("Fetching {}", url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.bytes().await?;

        if content_type.contains("html") {
            let html = String::from_utf8_lossy(&body);
            let title = self.extract_title(&html);
            let article = self.article_html(&html);
            let text = html2text::from_read(article.as_bytes(), HTML_TEXT_WIDTH)
                .map_err(|e| BlogcastError::Ingestion(format!("HTML conversion failed: {}", e)))?;
            debug!("Converted {} bytes of HTML to {} chars", body.len(), text.len());
            Ok((title, strip_markdown(&text)))
        } else {
            Ok((None, normalize_text(&String::from_utf8_lossy(&body))))
        }
    }
}

#[async_trait]
impl Ingestor for BlogIngestor {
    async fn ingest(&self, source: &SourceRef) -> Result<SourceContent> {
        source.validate()?;

        let (title, text, uri) = match source {
            SourceRef::Url { url, title } => {
                let (page_title, text) = self.fetch(url).await?;
                (title.clone().or(page_title), text, url.clone())
            }
            SourceRef::Markdown { body, title } => {
                (title.clone(), strip_markdown(body), "markdown:".to_string())
            }
            SourceRef::Text { body, title } => {
                (title.clone(), normalize_text(body), "text:".to_string())
            }
        };

        if text.trim().is_empty() {
            return Err(BlogcastError::InvalidInput(format!(
                "no readable text in {}",
                source.describe()
            )));
        }

        let title = title.unwrap_or_else(|| first_line_title(&text));
        let content = SourceContent::new(title, text, uri);
        info!(
            source_id = %content.id,
            words = content.word_count(),
            "Ingested '{}'",
            content.title
        );
        Ok(content)
    }
}

/// Fall back to the first line of the text, capped to a readable length.
fn first_line_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or("Untitled").trim();
    if line.is_empty() {
        return "Untitled".to_string();
    }
    let mut title: String = line.chars().take(80).collect();
    if line.chars().count() > 80 {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ingest_markdown() {
        let ingestor = BlogIngestor::new().unwrap();
        let content = ingestor
            .ingest(&SourceRef::Markdown {
                body: "# Borrowing\n\nThe **borrow checker** keeps references valid.".to_string(),
                title: None,
            })
            .await
            .unwrap();

        assert_eq!(content.title, "Borrowing");
        assert_eq!(content.text, "Borrowing\n\nThe borrow checker keeps references valid.");
        assert_eq!(content.source_uri, "markdown:");
    }

    #[tokio::test]
    async fn test_ingest_text_keeps_explicit_title() {
        let ingestor = BlogIngestor::new().unwrap();
        let content = ingestor
            .ingest(&SourceRef::Text {
                body: "Async Rust runs on executors.".to_string(),
                title: Some("Async".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(content.title, "Async");
        assert_eq!(content.word_count(), 5);
    }

    #[tokio::test]
    async fn test_markdown_with_no_text_is_invalid() {
        let ingestor = BlogIngestor::new().unwrap();
        let err = ingestor
            .ingest(&SourceRef::Markdown {
                body: "![only an image](a.png)".to_string(),
                title: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BlogcastError::InvalidInput(_)));
    }

    #[test]
    fn test_extract_title_prefers_h1() {
        let ingestor = BlogIngestor::new().unwrap();
        let html = "<html><head><title>Site | Post</title></head><body><h1 class=\"t\">The <em>Post</em></h1></body></html>";
        assert_eq!(ingestor.extract_title(html).as_deref(), Some("The Post"));

        let html = "<title>Only Title</title>";
        assert_eq!(ingestor.extract_title(html).as_deref(), Some("Only Title"));
    }

    #[test]
    fn test_first_line_title_is_capped() {
        let long = "word ".repeat(40);
        let title = first_line_title(&long);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 83);
    }
}
