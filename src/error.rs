//! Error types for Blogcast.

use crate::script::{PassResult, ScriptDocument};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the pipeline should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller error. Never retried, surfaced immediately.
    InvalidInput,
    /// Network, timeout or rate limit on an external call. Retried with backoff.
    Transient,
    /// Unrecoverable. The stage and the job move to `failed`.
    Fatal,
    /// Cooperative cancellation was observed.
    Cancelled,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::InvalidInput => write!(f, "invalid_input"),
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Fatal => write!(f, "fatal"),
            ErrorClass::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Library-level error type for Blogcast operations.
#[derive(Error, Debug)]
pub enum BlogcastError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Refinement exhausted in pass '{pass}' after {} pass invocations", .history.len())]
    RefinementExhausted {
        pass: String,
        history: Vec<PassResult>,
        last_draft: Box<ScriptDocument>,
    },

    #[error("Unknown voice '{speaker}' on turn {turn_index}")]
    UnknownVoice { turn_index: usize, speaker: String },

    #[error("Synthesis failed for turn {turn_index} after {attempts} attempts: {reason}")]
    SynthesisFailed {
        turn_index: usize,
        attempts: u32,
        reason: String,
    },

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Knowledge store error: {0}")]
    KnowledgeStore(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Post-processing failed: {0}")]
    PostProcess(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl BlogcastError {
    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            BlogcastError::InvalidInput(_) | BlogcastError::JobNotFound(_) => {
                ErrorClass::InvalidInput
            }
            BlogcastError::Transient(_) => ErrorClass::Transient,
            BlogcastError::Cancelled => ErrorClass::Cancelled,
            BlogcastError::Http(e) => {
                let retryable_status = e
                    .status()
                    .is_some_and(|s| s.as_u16() == 429 || s.is_server_error());
                if e.is_timeout() || e.is_connect() || e.is_request() || retryable_status {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            BlogcastError::OpenAI(msg) => {
                let msg = msg.to_lowercase();
                if msg.contains("rate limit")
                    || msg.contains("timed out")
                    || msg.contains("timeout")
                    || msg.contains("connection")
                    || msg.contains("overloaded")
                {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            BlogcastError::Database(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Whether the error is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Promote an error whose retry budget is spent to a fatal one.
    pub fn into_fatal(self) -> Self {
        match self {
            BlogcastError::Transient(msg) => {
                BlogcastError::Fatal(format!("retries exhausted: {}", msg))
            }
            e if e.is_transient() => BlogcastError::Fatal(format!("retries exhausted: {}", e)),
            e => e,
        }
    }
}

/// Result type alias for Blogcast operations.
pub type Result<T> = std::result::Result<T, BlogcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            BlogcastError::InvalidInput("empty".into()).class(),
            ErrorClass::InvalidInput
        );
        assert_eq!(BlogcastError::Transient("429".into()).class(), ErrorClass::Transient);
        assert_eq!(BlogcastError::Cancelled.class(), ErrorClass::Cancelled);
        assert_eq!(
            BlogcastError::SynthesisFailed {
                turn_index: 2,
                attempts: 3,
                reason: "timeout".into()
            }
            .class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            BlogcastError::OpenAI("Rate limit reached for gpt-4o".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            BlogcastError::OpenAI("invalid api key".into()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_into_fatal_promotes_transient_only() {
        let promoted = BlogcastError::Transient("timeout".into()).into_fatal();
        assert_eq!(promoted.class(), ErrorClass::Fatal);
        assert!(promoted.to_string().contains("retries exhausted"));

        let kept = BlogcastError::InvalidInput("bad".into()).into_fatal();
        assert_eq!(kept.class(), ErrorClass::InvalidInput);
    }
}
