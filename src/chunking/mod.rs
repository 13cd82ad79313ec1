//! Content chunking for knowledge indexing.
//!
//! Splits normalized blog text into overlapping chunks at paragraph
//! boundaries, falling back to sentence boundaries for oversized paragraphs.

mod paragraph;

pub use paragraph::ParagraphChunker;

use crate::config::ChunkingSettings;
use serde::{Deserialize, Serialize};

/// A chunk of source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Text content of this chunk.
    pub content: String,
    /// Zero-based order of this chunk in the source.
    pub position: usize,
}

impl ContentChunk {
    pub fn new(content: String, position: usize) -> Self {
        Self { content, position }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Configuration for chunking.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in words.
    pub chunk_words: usize,
    /// Words repeated from the end of one chunk at the start of the next.
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&ChunkingSettings::default())
    }
}

impl From<&ChunkingSettings> for ChunkingConfig {
    fn from(settings: &ChunkingSettings) -> Self {
        let chunk_words = settings.chunk_words.max(1);
        Self {
            chunk_words,
            // Overlap must leave room for new words in every chunk.
            overlap_words: settings.overlap_words.min(chunk_words / 2),
        }
    }
}

/// Trait for chunking implementations.
pub trait Chunker: Send + Sync {
    /// Split text into ordered chunks.
    fn chunk(&self, text: &str, config: &ChunkingConfig) -> Vec<ContentChunk>;
}
