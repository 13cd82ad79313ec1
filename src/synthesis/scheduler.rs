//! Bounded worker pool over dialogue turns.

use super::{AudioSegment, AudioTimeline, SynthesisAttempt, Synthesizer};
use crate::cancel::{sleep_unless_cancelled, CancelCheck};
use crate::config::SynthesisSettings;
use crate::error::{BlogcastError, Result};
use crate::retry::RetryPolicy;
use crate::script::{DialogueTurn, ScriptDocument};
use crate::voice::VoiceRegistry;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Called with `(completed, total)` after each turn finishes.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Converts approved scripts into audio timelines.
pub struct SynthesisScheduler {
    synthesizer: Arc<dyn Synthesizer>,
    voices: Arc<VoiceRegistry>,
    worker_count: usize,
    policy: RetryPolicy,
}

impl SynthesisScheduler {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        voices: Arc<VoiceRegistry>,
        worker_count: usize,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            synthesizer,
            voices,
            worker_count: worker_count.max(1),
            policy,
        }
    }

    pub fn from_settings(
        settings: &SynthesisSettings,
        synthesizer: Arc<dyn Synthesizer>,
        voices: Arc<VoiceRegistry>,
    ) -> Self {
        let base = Duration::from_millis(settings.backoff_ms);
        Self::new(
            synthesizer,
            voices,
            settings.worker_count,
            RetryPolicy::new(settings.max_attempts, base, base.saturating_mul(16)),
        )
    }

    pub fn voices(&self) -> &VoiceRegistry {
        &self.voices
    }

    /// Synthesize every turn of `script` into `out_dir`.
    ///
    /// Either every turn gets exactly one segment or an error is returned.
    /// Once one turn fails, or `cancel` fires, no further turns are started;
    /// turns already in flight are awaited and their output discarded.
    #[instrument(skip_all, fields(turns = script.len(), workers = self.worker_count))]
    pub async fn synthesize(
        &self,
        script: &ScriptDocument,
        out_dir: &Path,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<AudioTimeline> {
        script.validate()?;
        if script.is_empty() {
            return Err(BlogcastError::InvalidInput(
                "script has no turns to synthesize".to_string(),
            ));
        }
        self.voices.check_script(script)?;
        cancel.check()?;

        tokio::fs::create_dir_all(out_dir).await?;

        let total = script.len();
        let completed = AtomicUsize::new(0);
        // Fires on cancel, or when a sibling turn fails.
        let halt = cancel.child_token();
        info!("Synthesizing {} turns with {} workers", total, self.worker_count);

        let turn_futures: Vec<_> = script
            .turns
            .iter()
            .map(|turn| self.synthesize_turn(turn, out_dir, &halt))
            .collect();
        let mut turns_stream = stream::iter(turn_futures).buffer_unordered(self.worker_count);

        let mut segments = Vec::with_capacity(total);
        let mut first_error: Option<BlogcastError> = None;

        while let Some(result) = turns_stream.next().await {
            match result {
                Ok(segment) => {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = &progress {
                        progress(done, total);
                    }
                    segments.push(segment);
                }
                // Turns skipped after a halt carry no information of their own.
                Err(BlogcastError::Cancelled) if first_error.is_some() => {}
                Err(e) => {
                    halt.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        drop(turns_stream);

        if cancel.is_cancelled() {
            discard(&segments).await;
            return Err(BlogcastError::Cancelled);
        }
        if let Some(e) = first_error {
            discard(&segments).await;
            return Err(e);
        }

        let timeline = AudioTimeline::assemble(script, segments)?;
        info!(
            seconds = timeline.total_duration_seconds(),
            "Synthesized {} segments",
            timeline.segments.len()
        );
        Ok(timeline)
    }

    #[instrument(skip_all, fields(turn_index = turn.turn_index, speaker = %turn.speaker))]
    async fn synthesize_turn(
        &self,
        turn: &DialogueTurn,
        out_dir: &Path,
        halt: &CancellationToken,
    ) -> Result<AudioSegment> {
        let voice = self.voices.resolve(turn)?;
        let location = out_dir.join(segment_file_name(turn));
        let mut attempt_log = Vec::new();
        let mut attempt = 0;

        loop {
            halt.check()?;
            attempt += 1;

            let started = Instant::now();
            let result = self.synthesizer.synthesize(turn, voice, &location).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(duration_seconds) => {
                    if halt.is_cancelled() {
                        let _ = tokio::fs::remove_file(&location).await;
                        return Err(BlogcastError::Cancelled);
                    }
                    attempt_log.push(SynthesisAttempt {
                        attempt,
                        elapsed_ms,
                        error: None,
                    });
                    debug!(attempt, elapsed_ms, "Synthesized turn");
                    return Ok(AudioSegment {
                        turn_index: turn.turn_index,
                        speaker: turn.speaker.clone(),
                        duration_seconds,
                        location,
                        attempts: attempt,
                        attempt_log,
                        cues: turn.cues.clone(),
                    });
                }
                Err(BlogcastError::Cancelled) => return Err(BlogcastError::Cancelled),
                Err(e) => {
                    attempt_log.push(SynthesisAttempt {
                        attempt,
                        elapsed_ms,
                        error: Some(e.to_string()),
                    });

                    if !e.is_transient() || attempt >= self.policy.max_attempts {
                        warn!(attempt, error = %e, "Turn synthesis failed");
                        return Err(BlogcastError::SynthesisFailed {
                            turn_index: turn.turn_index,
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }

                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient synthesis failure, will retry after backoff"
                    );
                    sleep_unless_cancelled(halt, delay).await?;
                }
            }
        }
    }
}

/// `turn_0003_sarah.wav`
pub(crate) fn segment_file_name(turn: &DialogueTurn) -> String {
    let speaker: String = turn
        .speaker
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("turn_{:04}_{}.wav", turn.turn_index, speaker)
}

async fn discard(segments: &[AudioSegment]) {
    for segment in segments {
        let _ = tokio::fs::remove_file(&segment.location).await;
    }
}
