//! Knowledge Store Adapter.
//!
//! Wraps chunking, embedding and nearest-neighbour lookup behind
//! [`KnowledgeStore`]. The vector backends only store and score; ordering
//! rules live in [`rank`].

mod memory;
mod sqlite;
mod store;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;
pub use store::VectorKnowledgeStore;

use crate::config::{KnowledgeBackend, Settings};
use crate::error::Result;
use crate::ingestion::SourceContent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A retrievable unit of source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub text: String,
    /// Zero-based position of the chunk in its source.
    pub position: usize,
    /// Similarity to the query, when returned from [`KnowledgeStore::retrieve`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Knowledge store consumed by the refinement loop.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Chunk, embed and store a source. Re-indexing replaces earlier chunks.
    async fn index(&self, source: &SourceContent) -> Result<usize>;

    /// Top `k` chunks of a source by descending relevance to `query`.
    ///
    /// Returns an empty sequence when the source was never indexed.
    async fn retrieve(&self, source_id: &str, query: &str, k: usize) -> Result<Vec<KnowledgeChunk>>;

    /// Every chunk of a source in position order.
    async fn retrieve_all(&self, source_id: &str) -> Result<Vec<KnowledgeChunk>>;
}

/// A chunk stored with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: Uuid,
    pub source_id: String,
    pub source_title: String,
    pub content: String,
    pub position: usize,
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

impl StoredChunk {
    pub fn new(
        source_id: String,
        source_title: String,
        content: String,
        position: usize,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            source_title,
            content,
            position,
            embedding,
            indexed_at: Utc::now(),
        }
    }
}

/// A search result with score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: StoredChunk,
    /// Similarity score (higher is better).
    pub score: f32,
}

impl From<SearchResult> for KnowledgeChunk {
    fn from(result: SearchResult) -> Self {
        Self {
            text: result.chunk.content,
            position: result.chunk.position,
            score: Some(result.score),
        }
    }
}

/// Trait for vector store implementations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Bulk upsert chunks.
    async fn upsert_batch(&self, chunks: &[StoredChunk]) -> Result<usize>;

    /// Score every chunk of a source against the query and keep the best `limit`.
    async fn search(
        &self,
        source_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// All chunks for a source, in position order.
    async fn get_by_source(&self, source_id: &str) -> Result<Vec<StoredChunk>>;

    /// Delete chunks by source ID.
    async fn delete_by_source(&self, source_id: &str) -> Result<usize>;

    /// Check if a source has any chunks.
    async fn is_indexed(&self, source_id: &str) -> Result<bool>;

    /// Get total chunk count.
    async fn chunk_count(&self) -> Result<usize>;
}

/// Create the configured vector backend.
pub fn create_vector_store(settings: &Settings) -> Result<Arc<dyn VectorStore>> {
    Ok(match settings.knowledge.backend {
        KnowledgeBackend::Sqlite => Arc::new(SqliteVectorStore::new(&settings.knowledge_path())?),
        KnowledgeBackend::Memory => Arc::new(MemoryVectorStore::new()),
    })
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Order results by descending score, ties by ascending position, and keep `limit`.
pub fn rank(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.position.cmp(&b.chunk.position))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(limit);
    results
}

/// Score a set of chunks against a query.
pub(crate) fn score_all(
    chunks: impl IntoIterator<Item = StoredChunk>,
    query_embedding: &[f32],
) -> Vec<SearchResult> {
    chunks
        .into_iter()
        .map(|chunk| {
            let score = cosine_similarity(query_embedding, &chunk.embedding);
            SearchResult { chunk, score }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(position: usize, score: f32) -> SearchResult {
        SearchResult {
            chunk: StoredChunk::new(
                "src".to_string(),
                "Title".to_string(),
                format!("chunk {}", position),
                position,
                vec![],
            ),
            score,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_rank_breaks_ties_by_position() {
        let ranked = rank(
            vec![result(3, 0.5), result(1, 0.9), result(0, 0.5), result(2, 0.5)],
            3,
        );
        let positions: Vec<usize> = ranked.iter().map(|r| r.chunk.position).collect();
        assert_eq!(positions, vec![1, 0, 2]);
    }
}
