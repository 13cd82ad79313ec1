//! Episode assembly from a synthesized timeline.
//!
//! The pause layout is computed as a plain [`AssemblyPlan`]; rendering the
//! plan to an encoded file is left to a [`PostProcessor`] implementation.

mod cleanup;
mod ffmpeg;

pub use cleanup::{prune_stale, remove_segments};
pub use ffmpeg::FfmpegPostProcessor;

use crate::config::{AudioSettings, Settings};
use crate::error::Result;
use crate::synthesis::AudioTimeline;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Silence around intro and outro music.
const MUSIC_GAP_MS: u32 = 500;

/// Turns a timeline into one encoded episode.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Assemble the timeline's segments into `output`, returning the artifact path.
    async fn assemble(&self, timeline: &AudioTimeline, output: &Path) -> Result<PathBuf>;
}

/// One element of the assembled episode.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyItem {
    /// Music bed, played as-is.
    Music(PathBuf),
    /// A synthesized turn, cleaned up when normalisation is on.
    Speech(PathBuf),
    Silence { ms: u32 },
}

/// Ordered list of what goes into the episode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssemblyPlan {
    pub items: Vec<AssemblyItem>,
}

impl AssemblyPlan {
    /// Lay out intro, turns with speaker-change and `[pause]` gaps, and outro.
    pub fn build(timeline: &AudioTimeline, settings: &AudioSettings) -> Self {
        let mut items = Vec::new();

        if let Some(intro) = existing_music(settings.intro.as_deref()) {
            items.push(AssemblyItem::Music(intro));
            items.push(AssemblyItem::Silence { ms: MUSIC_GAP_MS });
        }

        let mut previous = None;
        for segment in &timeline.segments {
            let mut gap = 0;
            if previous.is_some_and(|p| p != &segment.speaker) {
                gap += settings.pause_between_speakers_ms;
            }
            if segment.cues.iter().any(|c| c == "pause") {
                gap += settings.cue_pause_ms;
            }
            if gap > 0 {
                items.push(AssemblyItem::Silence { ms: gap });
            }
            items.push(AssemblyItem::Speech(segment.location.clone()));
            previous = Some(&segment.speaker);
        }

        if let Some(outro) = existing_music(settings.outro.as_deref()) {
            items.push(AssemblyItem::Silence { ms: MUSIC_GAP_MS });
            items.push(AssemblyItem::Music(outro));
        }

        Self { items }
    }

    pub fn speech_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, AssemblyItem::Speech(_)))
            .count()
    }

    pub fn silence_ms(&self) -> u64 {
        self.items
            .iter()
            .map(|i| match i {
                AssemblyItem::Silence { ms } => *ms as u64,
                _ => 0,
            })
            .sum()
    }
}

/// Music paths that are configured but missing are skipped.
fn existing_music(path: Option<&str>) -> Option<PathBuf> {
    let path = path.filter(|p| !p.trim().is_empty()).map(Settings::expand_path)?;
    if path.exists() {
        Some(path)
    } else {
        tracing::debug!("Music file not found, skipping: {}", path.display());
        None
    }
}
