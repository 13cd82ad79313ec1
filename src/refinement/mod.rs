//! Refinement Loop.
//!
//! Runs a fixed, ordered list of named editorial passes over a
//! [`ScriptDocument`]. Each pass approves the current draft, asks for a
//! revision (the same pass re-runs on the new draft), or asks to go back to an
//! earlier pass. Every invocation leaves a [`PassResult`] on the document.
//!
//! Total evaluator calls, transient retries included, are capped at
//! `passes * (max_retries + 1) + passes`.

mod llm;

pub use llm::LlmPassEvaluator;

use crate::cancel::{sleep_unless_cancelled, CancelCheck};
use crate::config::Settings;
use crate::error::{BlogcastError, Result};
use crate::ingestion::SourceContent;
use crate::knowledge::{KnowledgeChunk, KnowledgeStore};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::script::{PassResult, ScriptDocument, Verdict};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Characters of the current script used as the retrieval query.
const QUERY_CHARS: usize = 2000;

/// What a pass decided about the draft it was shown.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Move on to the next pass.
    ///
    /// `generated` carries a draft produced from scratch by a generating pass
    /// (the current document was empty). Critique passes leave it `None`.
    Approve {
        reason: Option<String>,
        generated: Option<ScriptDocument>,
    },
    /// Replace the draft and run the same pass again.
    Revise {
        draft: ScriptDocument,
        reason: String,
    },
    /// Go back to an earlier pass, optionally with a corrected draft.
    Regress {
        target: String,
        reason: String,
        draft: Option<ScriptDocument>,
    },
}

/// Everything a pass evaluator sees besides the draft itself.
#[derive(Debug)]
pub struct PassContext<'a> {
    pub pass: &'a str,
    /// All passes in order, for regression targets.
    pub passes: &'a [String],
    pub source: &'a SourceContent,
    /// Chunks retrieved for this invocation.
    pub grounding: &'a [KnowledgeChunk],
    /// 1-based invocation number within the current visit of this pass.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// External drafting/critique collaborator.
#[async_trait]
pub trait PassEvaluator: Send + Sync {
    async fn evaluate(&self, ctx: &PassContext<'_>, script: &ScriptDocument) -> Result<PassOutcome>;
}

/// Bounded state machine over the editorial passes.
pub struct RefinementLoop {
    passes: Vec<String>,
    max_retries_per_pass: u32,
    retrieval_k: usize,
    evaluator: Arc<dyn PassEvaluator>,
    knowledge: Arc<dyn KnowledgeStore>,
    call_policy: RetryPolicy,
}

impl RefinementLoop {
    pub fn new(
        passes: Vec<String>,
        max_retries_per_pass: u32,
        evaluator: Arc<dyn PassEvaluator>,
        knowledge: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self {
            passes,
            max_retries_per_pass,
            retrieval_k: 8,
            evaluator,
            knowledge,
            call_policy: RetryPolicy::default(),
        }
    }

    pub fn from_settings(
        settings: &Settings,
        evaluator: Arc<dyn PassEvaluator>,
        knowledge: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self::new(
            settings.refinement.passes.clone(),
            settings.refinement.max_retries_per_pass,
            evaluator,
            knowledge,
        )
        .with_retrieval_k(settings.knowledge.retrieval_k)
        .with_call_policy(RetryPolicy::new(
            settings.pipeline.stage_max_attempts,
            Duration::from_millis(settings.pipeline.stage_backoff_ms),
            Duration::from_millis(settings.pipeline.stage_backoff_max_ms),
        ))
    }

    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }

    /// Backoff for transient evaluator or retrieval failures.
    pub fn with_call_policy(mut self, policy: RetryPolicy) -> Self {
        self.call_policy = policy;
        self
    }

    /// Upper bound on evaluator calls for one run.
    pub fn invocation_bound(&self) -> usize {
        let n = self.passes.len();
        n * (self.max_retries_per_pass as usize + 1) + n
    }

    /// Run every pass in order and return the approved script.
    #[instrument(skip_all, fields(source_id = %source.id, passes = self.passes.len()))]
    pub async fn run(
        &self,
        source: &SourceContent,
        initial: ScriptDocument,
        cancel: &CancellationToken,
    ) -> Result<ScriptDocument> {
        if self.passes.is_empty() {
            return Err(BlogcastError::Config("no refinement passes configured".to_string()));
        }

        let max_attempts = self.max_retries_per_pass + 1;
        let bound = self.invocation_bound();
        let mut doc = initial;
        let mut idx = 0;
        let mut attempt = 0u32;
        let mut invocations = 0usize;
        let mut regressed: HashSet<usize> = HashSet::new();

        while idx < self.passes.len() {
            let pass = self.passes[idx].as_str();
            cancel.check()?;

            if invocations >= bound {
                warn!(pass, invocations, "Invocation bound reached");
                return Err(exhausted(pass, doc));
            }

            attempt += 1;

            let grounding = cancel.settle(self.grounding(source, pass, &doc).await)?;

            let ctx = PassContext {
                pass,
                passes: &self.passes,
                source,
                grounding: &grounding,
                attempt,
                max_attempts,
            };
            debug!(pass, attempt, revision = doc.revision, "Invoking pass");
            let outcome = self
                .evaluate_within_bound(&ctx, &doc, &mut invocations, bound, cancel)
                .await?;
            let Some(outcome) = outcome else {
                warn!(pass, invocations, "Invocation bound reached during retries");
                return Err(exhausted(pass, doc));
            };

            match outcome {
                PassOutcome::Approve { reason, generated } => {
                    if let Some(draft) = generated {
                        doc.replace_with(draft);
                    }
                    info!(pass, attempt, revision = doc.revision, "Pass approved");
                    doc.record(PassResult::new(pass, Verdict::Approved, reason, doc.revision));
                    idx += 1;
                    attempt = 0;
                }
                PassOutcome::Revise { draft, reason } => {
                    info!(pass, attempt, reason = %reason, "Pass requested revision");
                    doc.record(PassResult::new(
                        pass,
                        Verdict::RevisionRequested,
                        Some(reason),
                        doc.revision,
                    ));
                    doc.replace_with(draft);
                    if attempt >= max_attempts {
                        return Err(exhausted(pass, doc));
                    }
                }
                PassOutcome::Regress {
                    target,
                    reason,
                    draft,
                } => {
                    let allowed = self.passes[..idx]
                        .iter()
                        .position(|p| *p == target)
                        .filter(|_| !regressed.contains(&idx));
                    match allowed {
                        Some(to) => {
                            regressed.insert(idx);
                            info!(pass, target = %target, reason = %reason, "Pass requested regression");
                            doc.record(PassResult::new(
                                pass,
                                Verdict::RegressionRequested { target },
                                Some(reason),
                                doc.revision,
                            ));
                            if let Some(draft) = draft {
                                doc.replace_with(draft);
                            }
                            idx = to;
                            attempt = 0;
                        }
                        None => {
                            // Spent budget, unknown or later target: same pass again.
                            warn!(pass, target = %target, "Regression not allowed, treating as revision");
                            doc.record(PassResult::new(
                                pass,
                                Verdict::RevisionRequested,
                                Some(reason),
                                doc.revision,
                            ));
                            if let Some(draft) = draft {
                                doc.replace_with(draft);
                            }
                            if attempt >= max_attempts {
                                return Err(exhausted(pass, doc));
                            }
                        }
                    }
                }
            }
        }

        if doc.is_empty() {
            return Err(BlogcastError::Fatal(
                "refinement finished with an empty script".to_string(),
            ));
        }
        doc.validate()?;

        info!(
            invocations,
            revision = doc.revision,
            turns = doc.len(),
            "Refinement complete"
        );
        Ok(doc)
    }

    /// Call the evaluator, retrying transient failures with backoff.
    ///
    /// Every call counts against `bound`; `None` means the bound was reached
    /// before a verdict arrived. A verdict or error that arrives after
    /// cancellation is dropped.
    async fn evaluate_within_bound(
        &self,
        ctx: &PassContext<'_>,
        doc: &ScriptDocument,
        invocations: &mut usize,
        bound: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<PassOutcome>> {
        let mut call = 0u32;
        loop {
            if *invocations >= bound {
                return Ok(None);
            }
            *invocations += 1;
            call += 1;

            let err = match cancel.settle(self.evaluator.evaluate(ctx, doc).await) {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(e) => e,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if call >= self.call_policy.max_attempts {
                warn!(pass = ctx.pass, call, error = %err, "Evaluator retries exhausted");
                return Err(err.into_fatal());
            }

            let delay = self.call_policy.delay_after(call);
            warn!(
                pass = ctx.pass,
                call,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Transient evaluator failure, will retry after backoff"
            );
            sleep_unless_cancelled(cancel, delay).await?;
        }
    }

    /// Retrieve grounding chunks for one invocation.
    ///
    /// Drafting queries by title; later passes query with the draft itself.
    async fn grounding(
        &self,
        source: &SourceContent,
        pass: &str,
        doc: &ScriptDocument,
    ) -> Result<Vec<KnowledgeChunk>> {
        let query = if doc.is_empty() {
            format!("{}\n{}", source.title, pass)
        } else {
            doc.to_text().chars().take(QUERY_CHARS).collect()
        };

        retry_with_backoff("retrieve grounding", &self.call_policy, |_| {
            self.knowledge.retrieve(&source.id, &query, self.retrieval_k)
        })
        .await
    }
}

fn exhausted(pass: &str, doc: ScriptDocument) -> BlogcastError {
    BlogcastError::RefinementExhausted {
        pass: pass.to_string(),
        history: doc.history.clone(),
        last_draft: Box::new(doc),
    }
}
