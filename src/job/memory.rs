//! In-memory job store.

use super::{Job, JobStore};
use crate::error::{BlogcastError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Non-durable job store for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .read()
            .map_err(|e| BlogcastError::JobStore(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .write()
            .map_err(|e| BlogcastError::JobStore(format!("Failed to acquire write lock: {}", e)))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        self.write()?.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.read()?.values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_incomplete(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .read()?
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut jobs = self.write()?;
        let expired: Vec<String> = jobs
            .values()
            .filter(|j| j.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        Ok(expired)
    }
}
