//! SQLite-backed job store.
//!
//! Each job is one row: the full record as JSON plus the columns needed to
//! filter without decoding it. Writes replace the row inside a transaction,
//! so readers see either the previous transition or the next one.

use super::{Job, JobStore};
use crate::error::{BlogcastError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    stage TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    record TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
"#;

const TERMINAL: &str = "('succeeded', 'failed', 'cancelled')";

/// Fixed-width UTC timestamps so that text comparison orders them.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Durable job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite job store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

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
            .map_err(|e| BlogcastError::JobStore(format!("Failed to acquire lock: {}", e)))
    }

    fn decode(record: &str) -> Result<Job> {
        serde_json::from_str(record)
            .map_err(|e| BlogcastError::JobStore(format!("Corrupt job record: {}", e)))
    }

    fn query_jobs(conn: &Connection, sql: &str, limit: i64) -> Result<Vec<Job>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        records.iter().map(|r| Self::decode(r)).collect()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, stage = %job.stage, status = %job.status))]
    async fn save(&self, job: &Job) -> Result<()> {
        let record = serde_json::to_string(job)?;
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO jobs (id, status, stage, created_at, updated_at, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                job.id,
                job.status.as_str(),
                job.stage.as_str(),
                timestamp(&job.created_at),
                timestamp(&job.updated_at),
                record,
            ],
        )?;

        tx.commit()?;
        debug!("Saved job record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT record FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;

        match rows.next()? {
            Some(row) => {
                let record: String = row.get(0)?;
                Ok(Some(Self::decode(&record)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        Self::query_jobs(
            &conn,
            "SELECT record FROM jobs ORDER BY updated_at DESC LIMIT ?1",
            limit as i64,
        )
    }

    async fn list_incomplete(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        Self::query_jobs(
            &conn,
            &format!(
                "SELECT record FROM jobs WHERE status NOT IN {} ORDER BY created_at LIMIT ?1",
                TERMINAL
            ),
            -1,
        )
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self))]
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let where_clause = format!("status IN {} AND updated_at < ?1", TERMINAL);
        let ids = {
            let mut stmt = tx.prepare(&format!("SELECT id FROM jobs WHERE {}", where_clause))?;
            let rows = stmt.query_map(params![timestamp(&cutoff)], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            &format!("DELETE FROM jobs WHERE {}", where_clause),
            params![timestamp(&cutoff)],
        )?;
        tx.commit()?;

        info!("Deleted {} expired jobs", ids.len());
        Ok(ids)
    }
}
