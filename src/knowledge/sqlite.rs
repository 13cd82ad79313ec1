//! SQLite-based vector store implementation.
//!
//! Embeddings are stored as little-endian `f32` blobs and scored in Rust.
//! Searches are always scoped to one source, which keeps the scan small.

use super::{rank, score_all, SearchResult, StoredChunk, VectorStore};
use crate::error::{BlogcastError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    source_title TEXT NOT NULL,
    content TEXT NOT NULL,
    position INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id);
"#;

const SELECT_COLUMNS: &str =
    "SELECT id, source_id, source_title, content, position, embedding, indexed_at FROM chunks";

/// SQLite-based vector store.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Create a new SQLite vector store.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite vector store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite vector store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BlogcastError::KnowledgeStore(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }

    fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<StoredChunk> {
        let id_str: String = row.get(0)?;
        let position: i64 = row.get(4)?;
        let embedding_bytes: Vec<u8> = row.get(5)?;
        let indexed_at_str: String = row.get(6)?;

        Ok(StoredChunk {
            id: uuid::Uuid::parse_str(&id_str).unwrap_or_default(),
            source_id: row.get(1)?,
            source_title: row.get(2)?,
            content: row.get(3)?,
            position: position.max(0) as usize,
            embedding: Self::bytes_to_embedding(&embedding_bytes),
            indexed_at: DateTime::parse_from_rfc3339(&indexed_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn load_source(conn: &Connection, source_id: &str) -> Result<Vec<StoredChunk>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE source_id = ?1 ORDER BY position",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![source_id], Self::row_to_chunk)?;
        let chunks = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn upsert_batch(&self, chunks: &[StoredChunk]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for chunk in chunks {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO chunks
                (id, source_id, source_title, content, position, embedding, indexed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    chunk.id.to_string(),
                    chunk.source_id,
                    chunk.source_title,
                    chunk.content,
                    chunk.position as i64,
                    Self::embedding_to_bytes(&chunk.embedding),
                    chunk.indexed_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        info!("Batch upserted {} chunks", chunks.len());
        Ok(chunks.len())
    }

    #[instrument(skip(self, query_embedding))]
    async fn search(
        &self,
        source_id: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let conn = self.lock()?;
        let chunks = Self::load_source(&conn, source_id)?;
        let results = rank(score_all(chunks, query_embedding), limit);
        debug!("Found {} matching chunks", results.len());
        Ok(results)
    }

    async fn get_by_source(&self, source_id: &str) -> Result<Vec<StoredChunk>> {
        let conn = self.lock()?;
        Self::load_source(&conn, source_id)
    }

    #[instrument(skip(self))]
    async fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM chunks WHERE source_id = ?1", params![source_id])?;
        debug!("Deleted {} chunks for source {}", deleted, source_id);
        Ok(deleted)
    }

    async fn is_indexed(&self, source_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_vector_store() {
        let store = SqliteVectorStore::in_memory().unwrap();

        let chunks = vec![
            StoredChunk::new(
                "post".to_string(),
                "Test Post".to_string(),
                "Second".to_string(),
                1,
                vec![0.5, 0.5, 0.0],
            ),
            StoredChunk::new(
                "post".to_string(),
                "Test Post".to_string(),
                "First".to_string(),
                0,
                vec![1.0, 0.0, 0.0],
            ),
        ];
        assert_eq!(store.upsert_batch(&chunks).await.unwrap(), 2);

        let listed = store.get_by_source("post").await.unwrap();
        assert_eq!(listed[0].content, "First");
        assert_eq!(listed[0].embedding, vec![1.0, 0.0, 0.0]);

        let results = store.search("post", &[1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!((results[0].score - 1.0).abs() < 0.001);

        assert!(store.search("other", &[1.0, 0.0, 0.0], 10).await.unwrap().is_empty());

        let deleted = store.delete_by_source("post").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.chunk_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.db");

        {
            let store = SqliteVectorStore::new(&path).unwrap();
            store
                .upsert_batch(&[StoredChunk::new(
                    "post".to_string(),
                    "T".to_string(),
                    "kept".to_string(),
                    0,
                    vec![1.0],
                )])
                .await
                .unwrap();
        }

        let store = SqliteVectorStore::new(&path).unwrap();
        assert!(store.is_indexed("post").await.unwrap());
    }
}
