//! Synthesis Scheduler.
//!
//! Turns an approved [`ScriptDocument`] into an [`AudioTimeline`]: one
//! synthesis request per dialogue turn, a bounded worker pool, per-turn retry
//! and a reorder by `turn_index` before the timeline is assembled.

mod http;
pub(crate) mod scheduler;

pub use http::HttpSynthesizer;
pub use scheduler::{ProgressFn, SynthesisScheduler};

use crate::error::{BlogcastError, Result};
use crate::script::{DialogueTurn, ScriptDocument, VoiceId};
use crate::voice::VoiceProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Acoustic synthesis collaborator.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render one turn in the given voice to `output`, returning its length in seconds.
    async fn synthesize(
        &self,
        turn: &DialogueTurn,
        voice: &VoiceProfile,
        output: &Path,
    ) -> Result<f64>;
}

/// One synthesis attempt for a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisAttempt {
    pub attempt: u32,
    pub elapsed_ms: u64,
    /// `None` on success.
    pub error: Option<String>,
}

/// Synthesized audio for one dialogue turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    pub turn_index: usize,
    pub speaker: VoiceId,
    pub duration_seconds: f64,
    pub location: PathBuf,
    /// Number of attempts it took, including the successful one.
    pub attempts: u32,
    #[serde(default)]
    pub attempt_log: Vec<SynthesisAttempt>,
    /// Delivery cues of the source turn, used for pauses during assembly.
    #[serde(default)]
    pub cues: Vec<String>,
}

/// Ordered per-turn audio plus the assembled episode, once post-processed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioTimeline {
    pub segments: Vec<AudioSegment>,
    pub artifact: Option<PathBuf>,
}

impl AudioTimeline {
    /// Assemble a timeline, requiring exactly one segment per script turn.
    pub fn assemble(script: &ScriptDocument, mut segments: Vec<AudioSegment>) -> Result<Self> {
        segments.sort_by_key(|s| s.turn_index);

        if segments.len() != script.len() {
            return Err(BlogcastError::Fatal(format!(
                "timeline has {} segments for {} turns",
                segments.len(),
                script.len()
            )));
        }
        for (expected, segment) in segments.iter().enumerate() {
            if segment.turn_index != expected {
                return Err(BlogcastError::Fatal(format!(
                    "timeline is missing turn {} or has a duplicate",
                    expected
                )));
            }
            if segment.speaker != script.turns[expected].speaker {
                return Err(BlogcastError::Fatal(format!(
                    "segment {} was synthesized for '{}' but the turn belongs to '{}'",
                    expected, segment.speaker, script.turns[expected].speaker
                )));
            }
        }

        Ok(Self {
            segments,
            artifact: None,
        })
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.segments.iter().map(|s| s.duration_seconds).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(turn_index: usize, speaker: &str) -> AudioSegment {
        AudioSegment {
            turn_index,
            speaker: VoiceId::new(speaker),
            duration_seconds: 1.5,
            location: PathBuf::from(format!("turn_{}.wav", turn_index)),
            attempts: 1,
            attempt_log: Vec::new(),
            cues: Vec::new(),
        }
    }

    fn script() -> ScriptDocument {
        ScriptDocument::from_turns(vec![
            DialogueTurn::new(VoiceId::new("Mike"), "one", 0),
            DialogueTurn::new(VoiceId::new("Sarah"), "two", 0),
            DialogueTurn::new(VoiceId::new("Mike"), "three", 0),
        ])
    }

    #[test]
    fn test_assemble_reorders_by_turn() {
        let timeline = AudioTimeline::assemble(
            &script(),
            vec![segment(2, "Mike"), segment(0, "Mike"), segment(1, "Sarah")],
        )
        .unwrap();

        let order: Vec<usize> = timeline.segments.iter().map(|s| s.turn_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!((timeline.total_duration_seconds() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_assemble_rejects_gaps_and_duplicates() {
        assert!(AudioTimeline::assemble(&script(), vec![segment(0, "Mike"), segment(1, "Sarah")]).is_err());
        assert!(AudioTimeline::assemble(
            &script(),
            vec![segment(0, "Mike"), segment(1, "Sarah"), segment(1, "Sarah")]
        )
        .is_err());
        assert!(AudioTimeline::assemble(
            &script(),
            vec![segment(0, "Mike"), segment(1, "Mike"), segment(2, "Mike")]
        )
        .is_err());
    }
}
