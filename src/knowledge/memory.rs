//! In-memory vector store implementation.
//!
//! Useful for testing and single-run pipelines.

use super::{rank, score_all, SearchResult, StoredChunk, VectorStore};
use crate::error::{BlogcastError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory vector store keyed by chunk ID.
pub struct MemoryVectorStore {
    chunks: RwLock<HashMap<String, StoredChunk>>,
}

impl MemoryVectorStore {
    /// Create a new in-memory vector store.
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, StoredChunk>>> {
        self.chunks
            .read()
            .map_err(|e| BlogcastError::KnowledgeStore(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, StoredChunk>>> {
        self.chunks
            .write()
            .map_err(|e| BlogcastError::KnowledgeStore(format!("Failed to acquire lock: {}", e)))
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert_batch(&self, chunks: &[StoredChunk]) -> Result<usize> {
        let mut store = self.write()?;
        for chunk in chunks {
            store.insert(chunk.id.to_string(), chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn search(
        &self,
        source_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let store = self.read()?;
        let candidates = store
            .values()
            .filter(|c| c.source_id == source_id)
            .cloned();
        Ok(rank(score_all(candidates, query_embedding), limit))
    }

    async fn get_by_source(&self, source_id: &str) -> Result<Vec<StoredChunk>> {
        let store = self.read()?;
        let mut result: Vec<StoredChunk> = store
            .values()
            .filter(|c| c.source_id == source_id)
            .cloned()
            .collect();
        result.sort_by_key(|c| c.position);
        Ok(result)
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        let mut store = self.write()?;
        let initial_len = store.len();
        store.retain(|_, c| c.source_id != source_id);
        Ok(initial_len - store.len())
    }

    async fn is_indexed(&self, source_id: &str) -> Result<bool> {
        Ok(self.read()?.values().any(|c| c.source_id == source_id))
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}
