//! [`KnowledgeStore`] backed by a chunker, an embedder and a vector store.

use super::{KnowledgeChunk, KnowledgeStore, StoredChunk, VectorStore};
use crate::chunking::{Chunker, ChunkingConfig, ParagraphChunker};
use crate::embedding::Embedder;
use crate::error::{BlogcastError, Result};
use crate::ingestion::SourceContent;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Knowledge store composed from pluggable parts.
pub struct VectorKnowledgeStore {
    chunker: Box<dyn Chunker>,
    config: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
}

impl VectorKnowledgeStore {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        config: ChunkingConfig,
    ) -> Self {
        Self {
            chunker: Box::new(ParagraphChunker::new()),
            config,
            embedder,
            vectors,
        }
    }
}

#[async_trait]
impl KnowledgeStore for VectorKnowledgeStore {
    #[instrument(skip(self, source), fields(source_id = %source.id))]
    async fn index(&self, source: &SourceContent) -> Result<usize> {
        let chunks = self.chunker.chunk(&source.text, &self.config);
        if chunks.is_empty() {
            debug!("Nothing to index");
            self.vectors.delete_by_source(&source.id).await?;
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(BlogcastError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        let width = self.embedder.dimensions();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != width) {
            return Err(BlogcastError::Embedding(format!(
                "expected {}-dimensional embeddings, got {}",
                width,
                bad.len()
            )));
        }

        let stored: Vec<StoredChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                StoredChunk::new(
                    source.id.clone(),
                    source.title.clone(),
                    chunk.content,
                    chunk.position,
                    embedding,
                )
            })
            .collect();

        self.vectors.delete_by_source(&source.id).await?;
        let count = self.vectors.upsert_batch(&stored).await?;
        info!("Indexed {} chunks", count);
        Ok(count)
    }

    #[instrument(skip(self, query))]
    async fn retrieve(&self, source_id: &str, query: &str, k: usize) -> Result<Vec<KnowledgeChunk>> {
        if k == 0 || !self.vectors.is_indexed(source_id).await? {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let results = self.vectors.search(source_id, &query_embedding, k).await?;
        debug!("Retrieved {} chunks", results.len());
        Ok(results.into_iter().map(KnowledgeChunk::from).collect())
    }

    async fn retrieve_all(&self, source_id: &str) -> Result<Vec<KnowledgeChunk>> {
        Ok(self
            .vectors
            .get_by_source(source_id)
            .await?
            .into_iter()
            .map(|c| KnowledgeChunk {
                text: c.content,
                position: c.position,
                score: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MemoryVectorStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as counts of a few keywords.
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    const KEYWORDS: [&str; 3] = ["rust", "memory", "async"];

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn vector(text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            KEYWORDS
                .iter()
                .map(|k| lower.matches(k).count() as f32)
                .collect()
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| Self::vector(t)).collect())
        }

        fn dimensions(&self) -> usize {
            KEYWORDS.len()
        }
    }

    fn store(embedder: Arc<KeywordEmbedder>) -> VectorKnowledgeStore {
        VectorKnowledgeStore::new(
            embedder,
            Arc::new(MemoryVectorStore::new()),
            ChunkingConfig {
                chunk_words: 4,
                overlap_words: 0,
            },
        )
    }

    fn source() -> SourceContent {
        SourceContent::new(
            "Rust",
            "Rust has no garbage collector.\n\nMemory safety comes from ownership.\n\nAsync Rust uses futures.\n\nRust rust rust everywhere.",
            "text:",
        )
    }

    #[tokio::test]
    async fn test_retrieve_before_index_is_empty() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let store = store(embedder.clone());

        let chunks = store.retrieve("never-indexed", "rust", 5).await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_score_then_position() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let store = store(embedder);
        let source = source();

        assert_eq!(store.index(&source).await.unwrap(), 4);

        let chunks = store.retrieve(&source.id, "rust", 4).await.unwrap();
        let positions: Vec<usize> = chunks.iter().map(|c| c.position).collect();
        // Chunks 0 and 3 tie on score, so position decides.
        assert_eq!(positions, vec![0, 3, 2, 1]);
        assert!(chunks.iter().all(|c| c.score.is_some()));

        let again = store.retrieve(&source.id, "rust", 4).await.unwrap();
        assert_eq!(chunks, again);
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks() {
        let store = store(Arc::new(KeywordEmbedder::new()));
        let source = source();

        store.index(&source).await.unwrap();
        store.index(&source).await.unwrap();

        let all = store.retrieve_all(&source.id).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].text, "Rust has no garbage collector.");
    }
}
