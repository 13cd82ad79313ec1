//! Voice profiles: speaker identities bound to reference samples.
//!
//! The registry is loaded and validated once at startup and then shared
//! read-only through an `Arc`.

pub(crate) mod wav;

pub use wav::{inspect_wav, WavInfo};

use crate::config::{HostSettings, Settings, VoiceSettings};
use crate::error::{BlogcastError, Result};
use crate::script::{DialogueTurn, ScriptDocument, VoiceId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// A speaker identity bound to a reference audio sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceProfile {
    pub id: VoiceId,
    /// Reference WAV used for voice cloning.
    pub reference: PathBuf,
    pub language: String,
    pub speed: f32,
    pub description: String,
    /// Length of the reference sample, when inspected.
    pub reference_seconds: Option<f64>,
}

impl VoiceProfile {
    pub fn new(id: VoiceId, reference: PathBuf) -> Self {
        Self {
            id,
            reference,
            language: "en".to_string(),
            speed: 1.0,
            description: String::new(),
            reference_seconds: None,
        }
    }

    fn from_host(host: &HostSettings) -> Self {
        Self {
            id: VoiceId::new(host.name.clone()),
            reference: Settings::expand_path(&host.reference),
            language: host.language.clone(),
            speed: host.speed,
            description: host.description.clone(),
            reference_seconds: None,
        }
    }
}

/// Immutable set of voice profiles keyed by speaker.
#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    profiles: HashMap<VoiceId, VoiceProfile>,
    order: Vec<VoiceId>,
}

impl VoiceRegistry {
    /// Load both hosts and validate their reference samples.
    pub fn load(settings: &VoiceSettings) -> Result<Self> {
        let mut profiles = Vec::new();
        for host in [&settings.host_a, &settings.host_b] {
            let mut profile = VoiceProfile::from_host(host);
            let info = validate_reference(&profile, settings)?;
            profile.reference_seconds = Some(info.duration_seconds);
            debug!(
                voice = %profile.id,
                seconds = info.duration_seconds,
                "Validated voice reference"
            );
            profiles.push(profile);
        }

        let registry = Self::from_profiles(profiles)?;
        info!("Loaded {} voice profiles", registry.len());
        Ok(registry)
    }

    /// Build a registry without touching the filesystem.
    pub fn from_profiles(profiles: Vec<VoiceProfile>) -> Result<Self> {
        let mut registry = Self::default();
        for profile in profiles {
            if registry.profiles.contains_key(&profile.id) {
                return Err(BlogcastError::Config(format!(
                    "voice '{}' is configured twice",
                    profile.id
                )));
            }
            registry.order.push(profile.id.clone());
            registry.profiles.insert(profile.id.clone(), profile);
        }
        Ok(registry)
    }

    pub fn get(&self, id: &VoiceId) -> Option<&VoiceProfile> {
        self.profiles.get(id)
    }

    /// Profile for a turn's speaker.
    pub fn resolve(&self, turn: &DialogueTurn) -> Result<&VoiceProfile> {
        self.get(&turn.speaker).ok_or_else(|| BlogcastError::UnknownVoice {
            turn_index: turn.turn_index,
            speaker: turn.speaker.to_string(),
        })
    }

    /// Fail on the first turn whose speaker has no profile.
    pub fn check_script(&self, script: &ScriptDocument) -> Result<()> {
        for turn in &script.turns {
            self.resolve(turn)?;
        }
        Ok(())
    }

    /// Speaker IDs in configuration order.
    pub fn ids(&self) -> &[VoiceId] {
        &self.order
    }

    pub fn profiles(&self) -> impl Iterator<Item = &VoiceProfile> {
        self.order.iter().filter_map(|id| self.profiles.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Check a reference sample against the configured format.
fn validate_reference(profile: &VoiceProfile, settings: &VoiceSettings) -> Result<WavInfo> {
    let path = &profile.reference;
    if !path.exists() {
        return Err(BlogcastError::Config(format!(
            "reference sample for '{}' not found: {}",
            profile.id,
            path.display()
        )));
    }

    let info = inspect_wav(path).map_err(|e| {
        BlogcastError::Config(format!(
            "reference sample for '{}' is not a readable WAV file: {}",
            profile.id, e
        ))
    })?;

    let problem = if !info.is_pcm {
        Some("must be PCM".to_string())
    } else if info.channels != 1 {
        Some(format!("must be mono, has {} channels", info.channels))
    } else if info.sample_rate != settings.sample_rate {
        Some(format!(
            "must be {} Hz, is {} Hz",
            settings.sample_rate, info.sample_rate
        ))
    } else if info.duration_seconds < settings.min_reference_seconds {
        Some(format!(
            "must be at least {:.1}s long, is {:.1}s",
            settings.min_reference_seconds, info.duration_seconds
        ))
    } else {
        None
    };

    match problem {
        Some(problem) => Err(BlogcastError::Config(format!(
            "reference sample for '{}' {}",
            profile.id, problem
        ))),
        None => Ok(info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::wav::tests::write_tone;

    fn settings(dir: &std::path::Path) -> VoiceSettings {
        let mut settings = VoiceSettings::default();
        settings.host_a.reference = dir.join("a.wav").to_string_lossy().to_string();
        settings.host_b.reference = dir.join("b.wav").to_string_lossy().to_string();
        settings
    }

    #[test]
    fn test_load_validates_references() {
        let dir = tempfile::tempdir().unwrap();
        write_tone(&dir.path().join("a.wav"), 1, 22050, 7.0);
        write_tone(&dir.path().join("b.wav"), 1, 22050, 8.0);

        let registry = VoiceRegistry::load(&settings(dir.path())).unwrap();
        assert_eq!(registry.ids(), &[VoiceId::new("Mike"), VoiceId::new("Sarah")]);
        let mike = registry.get(&VoiceId::new("Mike")).unwrap();
        assert!((mike.reference_seconds.unwrap() - 7.0).abs() < 0.01);
    }

    #[test]
    fn test_load_rejects_bad_references() {
        let dir = tempfile::tempdir().unwrap();
        write_tone(&dir.path().join("a.wav"), 2, 22050, 7.0);
        write_tone(&dir.path().join("b.wav"), 1, 22050, 8.0);
        let err = VoiceRegistry::load(&settings(dir.path())).unwrap_err();
        assert!(err.to_string().contains("mono"));

        write_tone(&dir.path().join("a.wav"), 1, 16000, 7.0);
        let err = VoiceRegistry::load(&settings(dir.path())).unwrap_err();
        assert!(err.to_string().contains("22050 Hz"));

        write_tone(&dir.path().join("a.wav"), 1, 22050, 2.0);
        let err = VoiceRegistry::load(&settings(dir.path())).unwrap_err();
        assert!(err.to_string().contains("at least"));

        std::fs::remove_file(dir.path().join("a.wav")).unwrap();
        let err = VoiceRegistry::load(&settings(dir.path())).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_check_script_reports_unknown_voice() {
        let registry = VoiceRegistry::from_profiles(vec![VoiceProfile::new(
            VoiceId::new("Mike"),
            PathBuf::from("a.wav"),
        )])
        .unwrap();

        let script = ScriptDocument::from_turns(vec![
            DialogueTurn::new(VoiceId::new("Mike"), "Hi", 0),
            DialogueTurn::new(VoiceId::new("Zed"), "Hey", 0),
        ]);

        match registry.check_script(&script) {
            Err(BlogcastError::UnknownVoice { turn_index, speaker }) => {
                assert_eq!(turn_index, 1);
                assert_eq!(speaker, "Zed");
            }
            other => panic!("expected UnknownVoice, got {:?}", other),
        }
    }
}
