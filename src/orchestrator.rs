//! Job Orchestrator.
//!
//! Owns every [`Job`] record and drives it one stage at a time through
//! ingestion, indexing, refinement, synthesis and post-processing. Each stage
//! entry is persisted before its work starts and each result is persisted
//! before the next stage may begin, so an interrupted job resumes from its
//! last completed stage.

use crate::cancel::{sleep_unless_cancelled, CancelCheck};
use crate::chunking::ChunkingConfig;
use crate::config::{Prompts, Settings};
use crate::embedding::OpenAIEmbedder;
use crate::error::{BlogcastError, Result};
use crate::ingestion::{BlogIngestor, Ingestor, SourceContent, SourceRef};
use crate::job::{self, create_job_store, ErrorRecord, Job, JobSnapshot, JobStatus, JobStore, Stage};
use crate::knowledge::{create_vector_store, KnowledgeStore, VectorKnowledgeStore};
use crate::postprocess::{self, FfmpegPostProcessor, PostProcessor};
use crate::refinement::{LlmPassEvaluator, PassEvaluator, RefinementLoop};
use crate::retry::RetryPolicy;
use crate::script::ScriptDocument;
use crate::synthesis::{AudioTimeline, HttpSynthesizer, ProgressFn, SynthesisScheduler, Synthesizer};
use crate::voice::VoiceRegistry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Segment directories older than this belong to runs that never finished.
const STALE_SEGMENTS: Duration = Duration::from_secs(3600);

/// External collaborators the orchestrator drives.
pub struct Components {
    pub store: Arc<dyn JobStore>,
    pub ingestor: Arc<dyn Ingestor>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub evaluator: Arc<dyn PassEvaluator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub voices: Arc<VoiceRegistry>,
    pub postprocessor: Arc<dyn PostProcessor>,
}

impl Components {
    /// Build the default stack from configuration.
    ///
    /// Voice references are validated here, once, before any job runs.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let embedder = Arc::new(OpenAIEmbedder::from_settings(&settings.embedding)?);
        let knowledge = Arc::new(VectorKnowledgeStore::new(
            embedder,
            create_vector_store(settings)?,
            ChunkingConfig::from(&settings.chunking),
        ));

        Ok(Self {
            store: create_job_store(settings)?,
            ingestor: Arc::new(BlogIngestor::new()?),
            knowledge,
            evaluator: Arc::new(LlmPassEvaluator::from_settings(settings, prompts)?),
            synthesizer: Arc::new(HttpSynthesizer::from_settings(&settings.synthesis)?),
            voices: Arc::new(VoiceRegistry::load(&settings.voices)?),
            postprocessor: Arc::new(FfmpegPostProcessor::new(
                settings.audio.clone(),
                settings.voices.sample_rate,
            )),
        })
    }
}

/// Result of one [`Orchestrator::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Nothing to do: the job is terminal, at its target, or already running.
    NoOp,
    /// The stage ran and its output is recorded.
    Completed(Stage),
    Failed(Stage),
    Cancelled(Stage),
}

/// What a stage produced.
enum StageOutput {
    Source(SourceContent),
    Indexed(usize),
    Script(ScriptDocument),
    Timeline(AudioTimeline),
    Artifact(PathBuf),
}

/// A stage in flight: its cancel token and a token fired when it lets go.
#[derive(Clone, Default)]
struct Claim {
    cancel: CancellationToken,
    released: CancellationToken,
}

enum Claimed {
    Acquired(Claim),
    /// Another caller holds the job; `released` fires when it lets go.
    Busy { released: CancellationToken },
}

enum Step {
    Ran(AdvanceOutcome),
    Busy { released: CancellationToken },
}

/// The top-level pipeline state machine.
pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn JobStore>,
    ingestor: Arc<dyn Ingestor>,
    knowledge: Arc<dyn KnowledgeStore>,
    refinement: RefinementLoop,
    scheduler: SynthesisScheduler,
    postprocessor: Arc<dyn PostProcessor>,
    stage_policy: RetryPolicy,
    /// Jobs with a stage in flight in this process.
    active: Mutex<HashMap<String, Claim>>,
    /// Live `(completed, total)` turn counts for jobs that are synthesizing.
    progress: Arc<Mutex<HashMap<String, (usize, usize)>>>,
}

impl Orchestrator {
    /// Create an orchestrator with the default components.
    pub fn new(settings: Settings) -> Result<Self> {
        let components = Components::from_settings(&settings)?;
        Ok(Self::with_components(settings, components))
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(settings: Settings, components: Components) -> Self {
        let refinement = RefinementLoop::from_settings(
            &settings,
            components.evaluator,
            components.knowledge.clone(),
        );
        let scheduler = SynthesisScheduler::from_settings(
            &settings.synthesis,
            components.synthesizer,
            components.voices,
        );
        let stage_policy = RetryPolicy::new(
            settings.pipeline.stage_max_attempts,
            Duration::from_millis(settings.pipeline.stage_backoff_ms),
            Duration::from_millis(settings.pipeline.stage_backoff_max_ms),
        );

        Self {
            settings,
            store: components.store,
            ingestor: components.ingestor,
            knowledge: components.knowledge,
            refinement,
            scheduler,
            postprocessor: components.postprocessor,
            stage_policy,
            active: Mutex::new(HashMap::new()),
            progress: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn voices(&self) -> &VoiceRegistry {
        self.scheduler.voices()
    }

    /// Validate a source reference and record a new pending job.
    ///
    /// Returns as soon as the job is stored; no stage work is started.
    pub async fn create_job(&self, source: SourceRef) -> Result<String> {
        self.create_job_with_target(source, Stage::Succeeded).await
    }

    /// Like [`create_job`](Self::create_job), but the job stops once `target` is complete.
    #[instrument(skip(self, source), fields(source = %source.describe()))]
    pub async fn create_job_with_target(&self, source: SourceRef, target: Stage) -> Result<String> {
        source.validate()?;
        let job = Job::new(source, target);
        self.store.save(&job).await?;
        info!(job_id = %job.id, target = %target, "Created job");
        Ok(job.id)
    }

    /// Drive a job one stage forward.
    ///
    /// A no-op when the job is terminal, has reached its target, or has a
    /// stage running already. A stage recorded as complete is never re-run.
    pub async fn advance(&self, id: &str) -> Result<AdvanceOutcome> {
        match self.step(id, None).await? {
            Step::Ran(outcome) => Ok(outcome),
            Step::Busy { .. } => {
                debug!(job_id = %id, "Stage already in flight");
                Ok(AdvanceOutcome::NoOp)
            }
        }
    }

    /// Read-only job view. Never waits on stage work.
    pub async fn get_status(&self, id: &str) -> Result<JobSnapshot> {
        let job = job::require(self.store.as_ref(), id).await?;
        Ok(job.snapshot(self.live_progress(id)))
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        job::require(self.store.as_ref(), id).await
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<JobSnapshot>> {
        let jobs = self.store.list(limit).await?;
        Ok(jobs
            .iter()
            .map(|j| j.snapshot(self.live_progress(&j.id)))
            .collect())
    }

    /// Move a non-terminal job to `cancelled`.
    ///
    /// The status is written immediately. A stage that is running keeps
    /// running; whatever it returns, success or failure, is discarded and the
    /// job stays cancelled.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<JobSnapshot> {
        let job = job::require(self.store.as_ref(), id).await?;
        if job.is_terminal() {
            return Err(BlogcastError::InvalidInput(format!(
                "job {} is already {}",
                id, job.status
            )));
        }

        let running = {
            let mut active = self.lock_active()?;
            match active.get(id) {
                Some(claim) => {
                    claim.cancel.cancel();
                    true
                }
                None => {
                    let claim = Claim::default();
                    claim.cancel.cancel();
                    active.insert(id.to_string(), claim);
                    false
                }
            }
        };

        let result = self.persist_cancel(id).await;
        if running {
            // The stage holds the job until it returns and settles the record then.
            info!("Cancellation requested for running job");
            let mut job = job;
            job.cancel();
            result?;
            return Ok(job.snapshot(self.live_progress(id)));
        }
        self.release(id);
        result?;
        self.get_status(id).await
    }

    /// Drive a job until it reaches `target`, fails, or is cancelled.
    ///
    /// While another caller has a stage in flight, waits for it to let go.
    #[instrument(skip(self))]
    pub async fn advance_through(&self, id: &str, target: Stage) -> Result<JobSnapshot> {
        loop {
            match self.step(id, Some(target)).await? {
                Step::Ran(AdvanceOutcome::Completed(_)) => continue,
                Step::Ran(_) => break,
                Step::Busy { released } => released.cancelled().await,
            }
        }
        self.get_status(id).await
    }

    /// Drive a job through every stage.
    pub async fn run_to_completion(&self, id: &str) -> Result<JobSnapshot> {
        self.advance_through(id, Stage::Succeeded).await
    }

    /// Drive a job in the background.
    pub fn spawn_drive(self: &Arc<Self>, id: String, target: Stage) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.advance_through(&id, target).await {
                Ok(snapshot) => debug!(job_id = %id, status = %snapshot.status, "Drive finished"),
                Err(e) => error!(job_id = %id, error = %e, "Drive failed"),
            }
        })
    }

    /// Re-drive every job left unfinished by a previous process.
    pub async fn resume_incomplete(self: &Arc<Self>) -> Result<Vec<String>> {
        let jobs = self.store.list_incomplete().await?;
        let mut resumed = Vec::new();
        for job in jobs {
            if job.next_stage().is_none() {
                continue;
            }
            info!(
                job_id = %job.id,
                from = %job.last_completed_stage(),
                "Resuming job"
            );
            self.spawn_drive(job.id.clone(), job.target);
            resumed.push(job.id);
        }
        Ok(resumed)
    }

    /// Delete terminal jobs last updated more than `older_than` ago, with their files.
    #[instrument(skip(self))]
    pub async fn purge_terminal(&self, older_than: chrono::Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now() - older_than;
        let removed = self.store.delete_terminal_before(cutoff).await?;
        for id in &removed {
            postprocess::remove_segments(&self.settings.segments_dir().join(id)).await?;
            for path in [self.script_path(id), self.episode_path(id)] {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        info!("Purged {} terminal jobs", removed.len());
        Ok(removed.len())
    }

    /// Remove leftover segment directories of runs that died mid-synthesis.
    pub async fn prune_stale_segments(&self) -> Result<usize> {
        let keep: Vec<String> = self
            .store
            .list_incomplete()
            .await?
            .into_iter()
            .map(|j| j.id)
            .collect();
        postprocess::prune_stale(&self.settings.segments_dir(), STALE_SEGMENTS, &keep).await
    }

    pub fn script_path(&self, id: &str) -> PathBuf {
        self.settings.scripts_dir().join(format!("{}.txt", id))
    }

    pub fn episode_path(&self, id: &str) -> PathBuf {
        self.settings.episodes_dir().join(format!("{}.mp3", id))
    }

    #[instrument(skip(self))]
    async fn step(&self, id: &str, until: Option<Stage>) -> Result<Step> {
        let claim = match self.claim(id)? {
            Claimed::Acquired(claim) => claim,
            Claimed::Busy { released } => return Ok(Step::Busy { released }),
        };

        let result = self.step_claimed(id, until, &claim.cancel).await;
        if self.release_unless_cancelled(id, &claim) {
            return result.map(Step::Ran);
        }

        // A cancel that arrived while the claim was held wins over whatever
        // the stage recorded, and is settled before anyone else can pick the
        // job up.
        let settled = match result {
            Ok(AdvanceOutcome::Completed(stage)) => {
                self.discard_output(stage, id).await;
                self.overrule_with_cancel(id)
                    .await
                    .map(|_| AdvanceOutcome::Cancelled(stage))
            }
            Ok(AdvanceOutcome::Failed(stage)) | Ok(AdvanceOutcome::Cancelled(stage)) => self
                .overrule_with_cancel(id)
                .await
                .map(|_| AdvanceOutcome::Cancelled(stage)),
            Ok(AdvanceOutcome::NoOp) => self.persist_cancel(id).await.map(|_| AdvanceOutcome::NoOp),
            Err(e) => {
                if let Err(persist) = self.persist_cancel(id).await {
                    warn!(job_id = %id, error = %persist, "Could not record cancellation");
                }
                Err(e)
            }
        };
        self.release(id);
        settled.map(Step::Ran)
    }

    async fn step_claimed(
        &self,
        id: &str,
        until: Option<Stage>,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome> {
        let mut job = job::require(self.store.as_ref(), id).await?;
        if job.is_terminal() {
            return Ok(AdvanceOutcome::NoOp);
        }
        if let Some(until) = until.filter(|u| *u > job.target) {
            job.target = until;
        }
        let Some(stage) = job.next_stage() else {
            if until.is_some() {
                self.store.save(&job).await?;
            }
            return Ok(AdvanceOutcome::NoOp);
        };
        if cancel.is_cancelled() {
            job.cancel();
            self.store.save(&job).await?;
            return Ok(AdvanceOutcome::Cancelled(stage));
        }

        job.enter(stage);
        self.store.save(&job).await?;
        info!(stage = %stage, "Stage started");

        let limit = self.settings.pipeline.error_log_limit;
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            let err = match self.run_stage(stage, &job, cancel).await {
                Ok(output) => break Ok(output),
                Err(e) => e,
            };
            if !err.is_transient() {
                break Err(err);
            }
            job.push_error(ErrorRecord::new(stage, &err), limit);
            if attempt >= self.stage_policy.max_attempts {
                error!(stage = %stage, attempt, error = %err, "Stage retries exhausted");
                break Err(err.into_fatal());
            }

            let delay = self.stage_policy.delay_after(attempt);
            warn!(
                stage = %stage,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Transient stage failure, will retry after backoff"
            );
            if let Err(e) = sleep_unless_cancelled(cancel, delay).await {
                break Err(e);
            }
        };
        self.progress_lock().remove(id);

        // Anything that comes back after a cancel, even an error, is dropped.
        let cancelled = cancel.is_cancelled() || self.cancelled_in_store(id).await;
        let outcome = match result {
            Ok(_) if cancelled => {
                self.discard_output(stage, id).await;
                job.cancel();
                AdvanceOutcome::Cancelled(stage)
            }
            Err(e) if cancelled || matches!(e, BlogcastError::Cancelled) => {
                info!(stage = %stage, error = %e, "Stage cancelled");
                job.cancel();
                AdvanceOutcome::Cancelled(stage)
            }
            Ok(output) => {
                self.apply(&mut job, output).await?;
                job.complete_stage();
                info!(stage = %stage, "Stage completed");
                AdvanceOutcome::Completed(stage)
            }
            Err(e) => {
                warn!(stage = %stage, error = %e, "Stage failed");
                if let BlogcastError::RefinementExhausted { last_draft, .. } = &e {
                    job.script = Some(last_draft.as_ref().clone());
                }
                job.fail(&e, limit);
                AdvanceOutcome::Failed(stage)
            }
        };

        self.store.save(&job).await?;
        Ok(outcome)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<StageOutput> {
        cancel.check()?;
        match stage {
            Stage::Ingesting => {
                let source = self.ingestor.ingest(&job.source_ref).await?;
                if source.text.trim().is_empty() {
                    return Err(BlogcastError::InvalidInput(format!(
                        "{} has no readable text",
                        job.source_ref.describe()
                    )));
                }
                info!(words = source.word_count(), title = %source.title, "Ingested source");
                Ok(StageOutput::Source(source))
            }
            Stage::Retrieving => {
                let source = required(job.source.as_ref(), "source content")?;
                let chunks = self.knowledge.index(source).await?;
                if chunks == 0 {
                    warn!("Source produced no knowledge chunks");
                }
                Ok(StageOutput::Indexed(chunks))
            }
            Stage::Refining => {
                let source = required(job.source.as_ref(), "source content")?;
                let script = self
                    .refinement
                    .run(source, ScriptDocument::default(), cancel)
                    .await?;
                Ok(StageOutput::Script(script))
            }
            Stage::Synthesizing => {
                let script = required(job.script.as_ref(), "approved script")?;
                let progress = self.progress_sink(&job.id, script.len());
                let timeline = self
                    .scheduler
                    .synthesize(
                        script,
                        &self.settings.segments_dir().join(&job.id),
                        cancel,
                        Some(progress),
                    )
                    .await?;
                Ok(StageOutput::Timeline(timeline))
            }
            Stage::PostProcessing => {
                let timeline = required(job.timeline.as_ref(), "audio timeline")?;
                let artifact = self
                    .postprocessor
                    .assemble(timeline, &self.episode_path(&job.id))
                    .await?;
                Ok(StageOutput::Artifact(artifact))
            }
            Stage::Pending | Stage::Succeeded => Err(BlogcastError::Fatal(format!(
                "stage {} has no work",
                stage
            ))),
        }
    }

    async fn apply(&self, job: &mut Job, output: StageOutput) -> Result<()> {
        match output {
            StageOutput::Source(source) => job.source = Some(source),
            StageOutput::Indexed(chunks) => job.chunk_count = Some(chunks),
            StageOutput::Script(script) => {
                let path = self.script_path(&job.id);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, script.to_text()).await?;
                debug!("Wrote script to {}", path.display());
                job.script = Some(script);
            }
            StageOutput::Timeline(timeline) => job.timeline = Some(timeline),
            StageOutput::Artifact(artifact) => {
                if let Some(timeline) = job.timeline.as_mut() {
                    timeline.artifact = Some(artifact);
                }
                postprocess::remove_segments(&self.settings.segments_dir().join(&job.id)).await?;
            }
        }
        Ok(())
    }

    /// Drop files a stage wrote after the job was cancelled.
    async fn discard_output(&self, stage: Stage, id: &str) {
        let result = match stage {
            Stage::Synthesizing => {
                postprocess::remove_segments(&self.settings.segments_dir().join(id)).await
            }
            Stage::PostProcessing => tokio::fs::remove_file(self.episode_path(id))
                .await
                .map_err(BlogcastError::from),
            _ => Ok(()),
        };
        if let Err(e) = result {
            debug!(stage = %stage, error = %e, "Could not discard stage output");
        }
    }

    /// A cancel written by another process while this one held the job.
    async fn cancelled_in_store(&self, id: &str) -> bool {
        matches!(
            self.store.get(id).await,
            Ok(Some(stored)) if stored.status == JobStatus::Cancelled
        )
    }

    async fn persist_cancel(&self, id: &str) -> Result<()> {
        let mut job = job::require(self.store.as_ref(), id).await?;
        if !job.is_terminal() {
            job.cancel();
            self.store.save(&job).await?;
            info!(job_id = %id, "Job cancelled");
        }
        Ok(())
    }

    /// Cancel a job whose stage result landed after the cancel did.
    async fn overrule_with_cancel(&self, id: &str) -> Result<()> {
        let mut job = job::require(self.store.as_ref(), id).await?;
        if job.status != JobStatus::Cancelled {
            debug!(job_id = %id, recorded = %job.status, "Late stage result overruled by cancel");
            job.cancel();
            self.store.save(&job).await?;
        }
        Ok(())
    }

    fn progress_sink(&self, id: &str, total: usize) -> ProgressFn {
        let progress = Arc::clone(&self.progress);
        let id = id.to_string();
        if let Ok(mut map) = progress.lock() {
            map.insert(id.clone(), (0, total));
        }
        Arc::new(move |done, total| {
            if let Ok(mut map) = progress.lock() {
                map.insert(id.clone(), (done, total));
            }
        })
    }

    fn live_progress(&self, id: &str) -> Option<(usize, usize)> {
        self.progress.lock().ok().and_then(|m| m.get(id).copied())
    }

    fn progress_lock(&self) -> MutexGuard<'_, HashMap<String, (usize, usize)>> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_active(&self) -> Result<MutexGuard<'_, HashMap<String, Claim>>> {
        self.active
            .lock()
            .map_err(|e| BlogcastError::Fatal(format!("Failed to acquire job lock: {}", e)))
    }

    /// Mark a job as in flight in this process.
    fn claim(&self, id: &str) -> Result<Claimed> {
        let mut active = self.lock_active()?;
        if let Some(held) = active.get(id) {
            return Ok(Claimed::Busy {
                released: held.released.clone(),
            });
        }
        let claim = Claim::default();
        active.insert(id.to_string(), claim.clone());
        Ok(Claimed::Acquired(claim))
    }

    /// Drop the claim unless it was cancelled. Checked under the same lock
    /// `cancel` takes, so a request is either seen here or finds the job idle.
    fn release_unless_cancelled(&self, id: &str, claim: &Claim) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if claim.cancel.is_cancelled() {
            return false;
        }
        active.remove(id);
        claim.released.cancel();
        true
    }

    fn release(&self, id: &str) {
        let released = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        if let Some(claim) = released {
            claim.released.cancel();
        }
    }
}

fn required<'a, T>(value: Option<&'a T>, what: &str) -> Result<&'a T> {
    value.ok_or_else(|| BlogcastError::Fatal(format!("{} missing from job record", what)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::MemoryJobStore;
    use crate::knowledge::KnowledgeChunk;
    use crate::refinement::tests::{draft, ScriptedEvaluator};
    use crate::refinement::{PassContext, PassOutcome};
    use crate::synthesis::scheduler::tests::{script, voices, MockSynthesizer};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockIngestor {
        calls: AtomicUsize,
        transient_failures: AtomicUsize,
        delay_ms: u64,
        /// Fail for good once the delay is over.
        fatal: bool,
    }

    #[async_trait]
    impl Ingestor for MockIngestor {
        async fn ingest(&self, source: &SourceRef) -> Result<SourceContent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fatal {
                return Err(BlogcastError::Ingestion("404 Not Found".into()));
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BlogcastError::Transient("connection reset".into()));
            }
            Ok(SourceContent::new(
                source.title().unwrap_or("Post"),
                "Rust was first released in 2015. It focuses on safety.",
                "text:",
            ))
        }
    }

    #[derive(Default)]
    struct CountingKnowledge {
        indexed: AtomicUsize,
    }

    #[async_trait]
    impl KnowledgeStore for CountingKnowledge {
        async fn index(&self, _source: &SourceContent) -> Result<usize> {
            self.indexed.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        }

        async fn retrieve(&self, _id: &str, _q: &str, k: usize) -> Result<Vec<KnowledgeChunk>> {
            Ok(vec![KnowledgeChunk {
                text: "Rust was first released in 2015.".into(),
                position: 0,
                score: Some(0.9),
            }]
            .into_iter()
            .take(k)
            .collect())
        }

        async fn retrieve_all(&self, id: &str) -> Result<Vec<KnowledgeChunk>> {
            self.retrieve(id, "", usize::MAX).await
        }
    }

    #[derive(Default)]
    struct MockPostProcessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PostProcessor for MockPostProcessor {
        async fn assemble(&self, timeline: &AudioTimeline, output: &Path) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(!timeline.is_empty());
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(output, b"ID3").await?;
            Ok(output.to_path_buf())
        }
    }

    /// Approves every pass after a short delay.
    struct SlowEvaluator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PassEvaluator for SlowEvaluator {
        async fn evaluate(&self, _ctx: &PassContext<'_>, script: &ScriptDocument) -> Result<PassOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(PassOutcome::Approve {
                reason: None,
                generated: script.is_empty().then(|| draft("slow")),
            })
        }
    }

    /// Fails every pass after a short delay.
    #[derive(Default)]
    struct FailingEvaluator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PassEvaluator for FailingEvaluator {
        async fn evaluate(&self, _ctx: &PassContext<'_>, _script: &ScriptDocument) -> Result<PassOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(BlogcastError::Fatal("model unavailable".into()))
        }
    }

    pub(crate) struct Harness {
        pub(crate) orchestrator: Arc<Orchestrator>,
        store: Arc<MemoryJobStore>,
        ingestor: Arc<MockIngestor>,
        knowledge: Arc<CountingKnowledge>,
        pub(crate) synthesizer: Arc<MockSynthesizer>,
        postprocessor: Arc<MockPostProcessor>,
        _dir: tempfile::TempDir,
    }

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.general.output_dir = dir.display().to_string();
        settings.pipeline.stage_backoff_ms = 1;
        settings.pipeline.stage_backoff_max_ms = 4;
        settings.synthesis.backoff_ms = 1;
        settings
    }

    fn harness_with(
        evaluator: Arc<dyn PassEvaluator>,
        ingestor: MockIngestor,
        synthesizer: MockSynthesizer,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let ingestor = Arc::new(ingestor);
        let knowledge = Arc::new(CountingKnowledge::default());
        let synthesizer = Arc::new(synthesizer);
        let postprocessor = Arc::new(MockPostProcessor::default());

        let orchestrator = Orchestrator::with_components(
            settings(dir.path()),
            Components {
                store: store.clone(),
                ingestor: ingestor.clone(),
                knowledge: knowledge.clone(),
                evaluator,
                synthesizer: synthesizer.clone(),
                voices: voices(),
                postprocessor: postprocessor.clone(),
            },
        );

        Harness {
            orchestrator: Arc::new(orchestrator),
            store,
            ingestor,
            knowledge,
            synthesizer,
            postprocessor,
            _dir: dir,
        }
    }

    pub(crate) fn harness() -> Harness {
        harness_with(
            Arc::new(ScriptedEvaluator::new()),
            MockIngestor::default(),
            MockSynthesizer::default(),
        )
    }

    fn text(body: &str) -> SourceRef {
        SourceRef::Text {
            body: body.into(),
            title: Some("Rust".into()),
        }
    }

    #[tokio::test]
    async fn test_empty_source_is_rejected_without_a_job() {
        let h = harness();
        let result = h.orchestrator.create_job(text("   ")).await;

        assert!(matches!(result, Err(BlogcastError::InvalidInput(_))));
        assert!(h.store.list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_job_does_not_start_work() {
        let h = harness();
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.stage, Stage::Pending);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_run_follows_stage_order() {
        let h = harness();
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.run_to_completion(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Succeeded);
        assert_eq!(snapshot.stage, Stage::Succeeded);
        assert_eq!(snapshot.progress, 1.0);

        let job = h.orchestrator.get_job(&id).await.unwrap();
        let entered: Vec<Stage> = job
            .transitions
            .iter()
            .filter(|t| t.status == JobStatus::Running)
            .map(|t| t.stage)
            .collect();
        assert_eq!(entered, Stage::WORK.to_vec());

        let artifact = job.artifact().unwrap();
        assert!(artifact.exists());
        assert_eq!(h.synthesizer.call_count(), job.script.as_ref().unwrap().len());
        assert_eq!(h.postprocessor.calls.load(Ordering::SeqCst), 1);
        assert!(h.orchestrator.script_path(&id).exists());
        assert!(!h.orchestrator.settings().segments_dir().join(&id).exists());
    }

    #[tokio::test]
    async fn test_advance_is_idempotent_at_target() {
        let h = harness();
        let id = h
            .orchestrator
            .create_job_with_target(text("A post about Rust."), Stage::Retrieving)
            .await
            .unwrap();

        assert_eq!(
            h.orchestrator.advance(&id).await.unwrap(),
            AdvanceOutcome::Completed(Stage::Ingesting)
        );
        assert_eq!(
            h.orchestrator.advance(&id).await.unwrap(),
            AdvanceOutcome::Completed(Stage::Retrieving)
        );
        assert_eq!(h.orchestrator.advance(&id).await.unwrap(), AdvanceOutcome::NoOp);
        assert_eq!(h.orchestrator.advance(&id).await.unwrap(), AdvanceOutcome::NoOp);

        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.knowledge.indexed.load(Ordering::SeqCst), 1);

        let snapshot = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Running);
        assert!(snapshot.stage_completed);

        // Raising the target picks up exactly where the job stopped.
        let snapshot = h
            .orchestrator
            .advance_through(&id, Stage::Refining)
            .await
            .unwrap();
        assert_eq!(snapshot.stage, Stage::Refining);
        assert!(snapshot.turns.is_some());
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_advance_while_stage_in_flight_is_noop() {
        let h = harness_with(
            Arc::new(ScriptedEvaluator::new()),
            MockIngestor {
                delay_ms: 100,
                ..Default::default()
            },
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let background = {
            let orchestrator = h.orchestrator.clone();
            let id = id.clone();
            tokio::spawn(async move { orchestrator.advance(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.orchestrator.advance(&id).await.unwrap(), AdvanceOutcome::NoOp);
        let status = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(status.stage, Stage::Ingesting);
        assert!(!status.stage_completed);

        assert_eq!(
            background.await.unwrap().unwrap(),
            AdvanceOutcome::Completed(Stage::Ingesting)
        );
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_stage_failure_is_retried() {
        let h = harness_with(
            Arc::new(ScriptedEvaluator::new()),
            MockIngestor {
                transient_failures: AtomicUsize::new(2),
                ..Default::default()
            },
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.run_to_completion(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Succeeded);
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_stage_retries_fail_the_job() {
        let h = harness_with(
            Arc::new(ScriptedEvaluator::new()),
            MockIngestor {
                transient_failures: AtomicUsize::new(10),
                ..Default::default()
            },
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.run_to_completion(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.stage, Stage::Ingesting);
        assert_eq!(snapshot.last_completed_stage, Stage::Pending);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            snapshot.last_error.unwrap().class,
            crate::error::ErrorClass::Fatal
        );
    }

    #[tokio::test]
    async fn test_failed_synthesis_turn_fails_job() {
        let evaluator = ScriptedEvaluator::new().on(
            "draft",
            vec![PassOutcome::Approve {
                reason: None,
                generated: Some(script(5)),
            }],
        );
        let h = harness_with(
            Arc::new(evaluator),
            MockIngestor::default(),
            MockSynthesizer {
                always_fail: HashSet::from([2]),
                ..Default::default()
            },
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.run_to_completion(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.stage, Stage::Synthesizing);
        assert_eq!(snapshot.last_completed_stage, Stage::Refining);
        let last_error = snapshot.last_error.unwrap();
        assert!(last_error.message.contains("turn 2"), "{}", last_error.message);

        let job = h.orchestrator.get_job(&id).await.unwrap();
        assert!(job.timeline.is_none());
        assert_eq!(h.postprocessor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refinement_exhaustion_keeps_last_draft() {
        let revise = |label: &str| PassOutcome::Revise {
            draft: draft(label),
            reason: "still inaccurate".into(),
        };
        let evaluator = ScriptedEvaluator::new().on(
            "accuracy-check",
            vec![revise("a"), revise("b"), revise("c"), revise("d")],
        );
        let h = harness_with(
            Arc::new(evaluator),
            MockIngestor::default(),
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.run_to_completion(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.stage, Stage::Refining);

        let job = h.orchestrator.get_job(&id).await.unwrap();
        let script = job.script.unwrap();
        assert_eq!(script.turns[0].text, "d opening");
        assert_eq!(script.results_for("accuracy-check").count(), 4);
        assert_eq!(h.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_refining() {
        let evaluator = Arc::new(SlowEvaluator {
            calls: AtomicUsize::new(0),
        });
        let h = harness_with(
            evaluator.clone(),
            MockIngestor::default(),
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();
        let drive = h.orchestrator.spawn_drive(id.clone(), Stage::Succeeded);

        while evaluator.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let calls_at_cancel = evaluator.calls.load(Ordering::SeqCst);
        h.orchestrator.cancel(&id).await.unwrap();
        drive.await.unwrap();

        let snapshot = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(snapshot.stage, Stage::Refining);
        assert!(evaluator.calls.load(Ordering::SeqCst) <= calls_at_cancel + 1);
        assert_eq!(h.synthesizer.call_count(), 0);

        // Terminal jobs cannot be cancelled again or advanced.
        assert!(h.orchestrator.cancel(&id).await.is_err());
        assert_eq!(h.orchestrator.advance(&id).await.unwrap(), AdvanceOutcome::NoOp);
    }

    #[tokio::test]
    async fn test_failure_after_cancel_is_discarded() {
        let h = harness_with(
            Arc::new(ScriptedEvaluator::new()),
            MockIngestor {
                delay_ms: 100,
                fatal: true,
                ..Default::default()
            },
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();
        let drive = h.orchestrator.spawn_drive(id.clone(), Stage::Succeeded);

        while h.ingestor.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let snapshot = h.orchestrator.cancel(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);

        // Recorded while the ingestor call is still running.
        let status = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);

        drive.await.unwrap();
        let status = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert_eq!(status.stage, Stage::Ingesting);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pass_error_after_cancel_ends_cancelled() {
        let evaluator = Arc::new(FailingEvaluator::default());
        let h = harness_with(
            evaluator.clone(),
            MockIngestor::default(),
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();
        let drive = h.orchestrator.spawn_drive(id.clone(), Stage::Succeeded);

        while evaluator.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.orchestrator.cancel(&id).await.unwrap();
        drive.await.unwrap();

        let status = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert_eq!(status.stage, Stage::Refining);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_drivers_run_each_stage_once() {
        let h = harness_with(
            Arc::new(ScriptedEvaluator::new()),
            MockIngestor {
                delay_ms: 50,
                ..Default::default()
            },
            MockSynthesizer::default(),
        );
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let first = h.orchestrator.spawn_drive(id.clone(), Stage::Succeeded);
        let second = {
            let orchestrator = h.orchestrator.clone();
            let id = id.clone();
            tokio::spawn(async move { orchestrator.advance_through(&id, Stage::Succeeded).await })
        };

        let snapshot = second.await.unwrap().unwrap();
        first.await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Succeeded);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.knowledge.indexed.load(Ordering::SeqCst), 1);
        assert_eq!(h.postprocessor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_idle_job() {
        let h = harness();
        let id = h.orchestrator.create_job(text("A post about Rust.")).await.unwrap();

        let snapshot = h.orchestrator.cancel(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(h.orchestrator.advance(&id).await.unwrap(), AdvanceOutcome::NoOp);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_stages() {
        let h = harness();

        // A job that was interrupted while refining.
        let mut job = Job::new(text("A post about Rust."), Stage::Succeeded);
        job.enter(Stage::Ingesting);
        job.source = Some(SourceContent::new("Rust", "Rust was first released in 2015.", "text:"));
        job.complete_stage();
        job.enter(Stage::Retrieving);
        job.chunk_count = Some(2);
        job.complete_stage();
        job.enter(Stage::Refining);
        h.store.save(&job).await.unwrap();

        let resumed = h.orchestrator.resume_incomplete().await.unwrap();
        assert_eq!(resumed, vec![job.id.clone()]);

        let mut status = h.orchestrator.get_status(&job.id).await.unwrap();
        for _ in 0..200 {
            if status.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = h.orchestrator.get_status(&job.id).await.unwrap();
        }

        assert_eq!(status.status, JobStatus::Succeeded);
        assert_eq!(h.ingestor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.knowledge.indexed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_terminal_jobs() {
        let h = harness();
        let done = h.orchestrator.create_job(text("One.")).await.unwrap();
        h.orchestrator.run_to_completion(&done).await.unwrap();
        let pending = h.orchestrator.create_job(text("Two.")).await.unwrap();

        assert_eq!(
            h.orchestrator
                .purge_terminal(chrono::Duration::days(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            h.orchestrator
                .purge_terminal(chrono::Duration::seconds(-1))
                .await
                .unwrap(),
            1
        );

        assert!(h.orchestrator.get_status(&done).await.is_err());
        assert!(!h.orchestrator.episode_path(&done).exists());
        assert!(h.orchestrator.get_status(&pending).await.is_ok());
    }
}
