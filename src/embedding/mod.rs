//! Embedding generation for knowledge indexing and retrieval.

mod openai;

pub use openai::OpenAIEmbedder;

use crate::error::{BlogcastError, Result};
use async_trait::async_trait;

/// Turns text into fixed-width vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Width of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed a single query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BlogcastError::Embedding("Empty embedding response".to_string()))
    }
}
