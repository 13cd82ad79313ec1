//! Job records and their persistence.
//!
//! A [`Job`] is one blog-to-podcast request. Its stage only moves forward
//! along [`Stage::next`], and every change is written through a [`JobStore`]
//! before the next unit of work starts.

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use crate::config::Settings;
use crate::error::{BlogcastError, ErrorClass, Result};
use crate::ingestion::{SourceContent, SourceRef};
use crate::script::ScriptDocument;
use crate::synthesis::AudioTimeline;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Ingesting,
    Retrieving,
    Refining,
    Synthesizing,
    PostProcessing,
    Succeeded,
}

impl Stage {
    /// Stages that carry work, in order.
    pub const WORK: [Stage; 5] = [
        Stage::Ingesting,
        Stage::Retrieving,
        Stage::Refining,
        Stage::Synthesizing,
        Stage::PostProcessing,
    ];

    /// The only stage allowed to follow this one.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Ingesting),
            Stage::Ingesting => Some(Stage::Retrieving),
            Stage::Retrieving => Some(Stage::Refining),
            Stage::Refining => Some(Stage::Synthesizing),
            Stage::Synthesizing => Some(Stage::PostProcessing),
            Stage::PostProcessing => Some(Stage::Succeeded),
            Stage::Succeeded => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Ingesting => "ingesting",
            Stage::Retrieving => "retrieving",
            Stage::Refining => "refining",
            Stage::Synthesizing => "synthesizing",
            Stage::PostProcessing => "post_processing",
            Stage::Succeeded => "succeeded",
        }
    }

    /// Number of work stages finished once this stage is complete.
    fn ordinal(self) -> usize {
        match self {
            Stage::Pending => 0,
            Stage::Ingesting => 1,
            Stage::Retrieving => 2,
            Stage::Refining => 3,
            Stage::Synthesizing => 4,
            Stage::PostProcessing | Stage::Succeeded => 5,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Stage::Pending),
            "ingesting" => Ok(Stage::Ingesting),
            "retrieving" => Ok(Stage::Retrieving),
            "refining" => Ok(Stage::Refining),
            "synthesizing" => Ok(Stage::Synthesizing),
            "post_processing" => Ok(Stage::PostProcessing),
            "succeeded" => Ok(Stage::Succeeded),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure observed while running a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub class: ErrorClass,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(stage: Stage, error: &BlogcastError) -> Self {
        Self {
            stage,
            class: error.class(),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}

/// A stage entry or a status change, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub stage: Stage,
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// One end-to-end conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source_ref: SourceRef,
    pub stage: Stage,
    /// Whether the work of `stage` has been recorded.
    pub stage_completed: bool,
    pub status: JobStatus,
    /// The stage callers asked this job to reach.
    pub target: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: Option<SourceContent>,
    pub chunk_count: Option<usize>,
    pub script: Option<ScriptDocument>,
    pub timeline: Option<AudioTimeline>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl Job {
    pub fn new(source_ref: SourceRef, target: Stage) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_ref,
            stage: Stage::Pending,
            stage_completed: true,
            status: JobStatus::Pending,
            target,
            created_at: now,
            updated_at: now,
            source: None,
            chunk_count: None,
            script: None,
            timeline: None,
            errors: Vec::new(),
            transitions: vec![Transition {
                stage: Stage::Pending,
                status: JobStatus::Pending,
                at: now,
            }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The stage the next `advance` would run, if any.
    ///
    /// An interrupted stage is picked up again; a completed one hands over to
    /// its successor as long as the job has not yet reached its target.
    pub fn next_stage(&self) -> Option<Stage> {
        if self.is_terminal() {
            return None;
        }
        if !self.stage_completed {
            return Some(self.stage);
        }
        if self.stage >= self.target {
            return None;
        }
        self.stage.next().filter(|s| *s != Stage::Succeeded)
    }

    /// Last stage whose output is recorded.
    pub fn last_completed_stage(&self) -> Stage {
        if self.stage_completed {
            return self.stage;
        }
        let idx = self.stage.ordinal();
        if idx <= 1 {
            Stage::Pending
        } else {
            Stage::WORK[idx - 2]
        }
    }

    /// Write-ahead marker: `stage` is about to run.
    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.stage_completed = false;
        self.set_status(JobStatus::Running);
    }

    /// Record that the running stage finished.
    pub fn complete_stage(&mut self) {
        self.stage_completed = true;
        if self.stage == Stage::PostProcessing {
            self.stage = Stage::Succeeded;
            self.set_status(JobStatus::Succeeded);
        } else {
            self.touch();
        }
    }

    pub fn fail(&mut self, error: &BlogcastError, limit: usize) {
        self.record_error(error, limit);
        self.set_status(JobStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.set_status(JobStatus::Cancelled);
    }

    pub fn record_error(&mut self, error: &BlogcastError, limit: usize) {
        self.push_error(ErrorRecord::new(self.stage, error), limit);
    }

    /// Keep at most `limit` records, dropping the oldest.
    pub fn push_error(&mut self, record: ErrorRecord, limit: usize) {
        self.errors.push(record);
        let limit = limit.max(1);
        if self.errors.len() > limit {
            let excess = self.errors.len() - limit;
            self.errors.drain(..excess);
        }
        self.touch();
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.last()
    }

    pub fn artifact(&self) -> Option<&PathBuf> {
        self.timeline.as_ref().and_then(|t| t.artifact.as_ref())
    }

    pub fn title(&self) -> Option<&str> {
        self.source
            .as_ref()
            .map(|s| s.title.as_str())
            .or_else(|| self.source_ref.title())
    }

    fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.touch();
        self.transitions.push(Transition {
            stage: self.stage,
            status,
            at: self.updated_at,
        });
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Read-only view for status queries.
    pub fn snapshot(&self, live_turns: Option<(usize, usize)>) -> JobSnapshot {
        let mut done = self.last_completed_stage().ordinal() as f32;
        if self.stage == Stage::Synthesizing && !self.stage_completed {
            if let Some((completed, total)) = live_turns.filter(|(_, t)| *t > 0) {
                done += completed as f32 / total as f32;
            }
        }
        let progress = (done / Stage::WORK.len() as f32).min(1.0);

        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            stage: self.stage,
            stage_completed: self.stage_completed,
            progress,
            message: self.message(live_turns),
            title: self.title().map(str::to_string),
            turns: self.script.as_ref().map(|s| s.len()),
            revision: self.script.as_ref().map(|s| s.revision),
            artifact: self.artifact().cloned(),
            last_completed_stage: self.last_completed_stage(),
            last_error: self.last_error().cloned(),
            error_count: self.errors.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn message(&self, live_turns: Option<(usize, usize)>) -> String {
        match self.status {
            JobStatus::Succeeded => "Podcast ready".to_string(),
            JobStatus::Cancelled => format!("Cancelled during {}", self.stage),
            JobStatus::Failed => match self.last_error() {
                Some(e) => format!("Failed during {}: {}", e.stage, e.message),
                None => format!("Failed during {}", self.stage),
            },
            JobStatus::Pending => "Waiting to start".to_string(),
            JobStatus::Running if self.stage_completed => {
                format!("Finished {}", self.stage)
            }
            JobStatus::Running => match (self.stage, live_turns) {
                (Stage::Synthesizing, Some((completed, total))) => {
                    format!("Synthesizing turn {}/{}", completed, total)
                }
                (stage, _) => format!("Running {}", stage),
            },
        }
    }
}

/// Status view of a job, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub stage: Stage,
    pub stage_completed: bool,
    /// Fraction of pipeline work done, 0.0 to 1.0.
    pub progress: f32,
    pub message: String,
    pub title: Option<String>,
    pub turns: Option<usize>,
    pub revision: Option<u32>,
    pub artifact: Option<PathBuf>,
    pub last_completed_stage: Stage,
    pub last_error: Option<ErrorRecord>,
    pub error_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable job records. Every `save` replaces the whole record atomically.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Most recently updated first.
    async fn list(&self, limit: usize) -> Result<Vec<Job>>;

    /// Jobs that are neither succeeded, failed nor cancelled.
    async fn list_incomplete(&self) -> Result<Vec<Job>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete terminal jobs last updated before `cutoff`. Returns the removed ids.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Fetch a job or fail with `JobNotFound`.
pub async fn require(store: &dyn JobStore, id: &str) -> Result<Job> {
    store
        .get(id)
        .await?
        .ok_or_else(|| BlogcastError::JobNotFound(id.to_string()))
}

/// Open the configured job store. `:memory:` selects a non-durable store.
pub fn create_job_store(settings: &Settings) -> Result<Arc<dyn JobStore>> {
    if settings.jobs.sqlite_path == ":memory:" {
        return Ok(Arc::new(MemoryJobStore::new()));
    }
    Ok(Arc::new(SqliteJobStore::new(&settings.jobs_path())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            SourceRef::Text {
                body: "Some post".into(),
                title: Some("Post".into()),
            },
            Stage::Succeeded,
        )
    }

    #[test]
    fn test_stage_chain() {
        let mut stage = Stage::Pending;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[1..6], Stage::WORK);
        assert_eq!("post-processing".parse::<Stage>().unwrap(), Stage::PostProcessing);
    }

    #[test]
    fn test_next_stage_resumes_interrupted_work() {
        let mut job = job();
        assert_eq!(job.next_stage(), Some(Stage::Ingesting));

        job.enter(Stage::Ingesting);
        assert_eq!(job.next_stage(), Some(Stage::Ingesting));
        assert_eq!(job.last_completed_stage(), Stage::Pending);

        job.complete_stage();
        assert_eq!(job.next_stage(), Some(Stage::Retrieving));

        job.enter(Stage::Retrieving);
        assert_eq!(job.last_completed_stage(), Stage::Ingesting);
    }

    #[test]
    fn test_target_limits_progress() {
        let mut job = job();
        job.target = Stage::Retrieving;
        job.enter(Stage::Ingesting);
        job.complete_stage();
        job.enter(Stage::Retrieving);
        job.complete_stage();

        assert_eq!(job.next_stage(), None);
        assert!(!job.is_terminal());

        job.target = Stage::Succeeded;
        assert_eq!(job.next_stage(), Some(Stage::Refining));
    }

    #[test]
    fn test_post_processing_completion_succeeds_job() {
        let mut job = job();
        for stage in Stage::WORK {
            job.enter(stage);
            job.complete_stage();
        }
        assert_eq!(job.stage, Stage::Succeeded);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.next_stage(), None);
        assert_eq!(job.snapshot(None).progress, 1.0);
    }

    #[test]
    fn test_error_log_is_bounded() {
        let mut job = job();
        for i in 0..5 {
            job.record_error(&BlogcastError::Transient(format!("timeout {}", i)), 3);
        }
        assert_eq!(job.errors.len(), 3);
        assert!(job.errors[0].message.contains("timeout 2"));
        assert_eq!(job.last_error().unwrap().class, ErrorClass::Transient);
    }

    #[test]
    fn test_snapshot_reports_live_synthesis() {
        let mut job = job();
        for stage in &Stage::WORK[..3] {
            job.enter(*stage);
            job.complete_stage();
        }
        job.enter(Stage::Synthesizing);

        let snapshot = job.snapshot(Some((5, 10)));
        assert!((snapshot.progress - 0.7).abs() < 1e-6);
        assert_eq!(snapshot.message, "Synthesizing turn 5/10");
        assert_eq!(snapshot.last_completed_stage, Stage::Refining);
        assert_eq!(snapshot.title.as_deref(), Some("Post"));
    }

    #[test]
    fn test_failed_job_keeps_diagnostics() {
        let mut job = job();
        job.enter(Stage::Ingesting);
        job.complete_stage();
        job.enter(Stage::Retrieving);
        job.fail(&BlogcastError::Fatal("index corrupt".into()), 20);

        let snapshot = job.snapshot(None);
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.last_completed_stage, Stage::Ingesting);
        assert_eq!(snapshot.last_error.unwrap().stage, Stage::Retrieving);
        assert!(snapshot.message.contains("index corrupt"));
    }
}
