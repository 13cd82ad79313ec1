//! Blog ingestion: turns a [`SourceRef`] into normalized [`SourceContent`].

mod blog;
mod normalize;

pub use blog::BlogIngestor;
pub use normalize::{normalize_text, strip_markdown};

use crate::error::{BlogcastError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied reference to the blog post to convert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    /// A web page to fetch.
    Url {
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
    /// Plain text.
    Text {
        body: String,
        #[serde(default)]
        title: Option<String>,
    },
    /// Markdown source, stripped to plain text.
    Markdown {
        body: String,
        #[serde(default)]
        title: Option<String>,
    },
}

impl SourceRef {
    /// Reject references that can never produce content.
    ///
    /// Reachability of a URL is not checked here; only that it is an absolute
    /// http(s) URL.
    pub fn validate(&self) -> Result<()> {
        match self {
            SourceRef::Url { url, .. } => {
                let parsed = url::Url::parse(url.trim()).map_err(|e| {
                    BlogcastError::InvalidInput(format!("invalid URL '{}': {}", url, e))
                })?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(BlogcastError::InvalidInput(format!(
                        "unsupported URL scheme '{}'",
                        parsed.scheme()
                    )));
                }
                Ok(())
            }
            SourceRef::Text { body, .. } | SourceRef::Markdown { body, .. } => {
                if body.trim().is_empty() {
                    Err(BlogcastError::InvalidInput("source content is empty".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            SourceRef::Url { title, .. }
            | SourceRef::Text { title, .. }
            | SourceRef::Markdown { title, .. } => title.as_deref(),
        }
    }

    /// Short description for logs and listings.
    pub fn describe(&self) -> String {
        match self {
            SourceRef::Url { url, .. } => url.clone(),
            SourceRef::Text { body, .. } => format!("text ({} chars)", body.len()),
            SourceRef::Markdown { body, .. } => format!("markdown ({} chars)", body.len()),
        }
    }
}

/// Normalized blog text plus metadata. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContent {
    pub id: String,
    pub title: String,
    pub text: String,
    /// Origin URL, or `text:`/`markdown:` for inline input.
    pub source_uri: String,
    pub ingested_at: DateTime<Utc>,
}

impl SourceContent {
    pub fn new(title: impl Into<String>, text: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            text: text.into(),
            source_uri: source_uri.into(),
            ingested_at: Utc::now(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Trait for ingestion implementations.
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Extract and normalize the content a source reference points at.
    async fn ingest(&self, source: &SourceRef) -> Result<SourceContent>;
}
