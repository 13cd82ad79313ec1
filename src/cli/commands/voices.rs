//! Voices command.

use crate::cli::{format_duration, Output};
use crate::config::Settings;
use crate::voice::VoiceRegistry;
use anyhow::Result;

/// Run the voices command.
pub fn run_voices(settings: &Settings) -> Result<()> {
    let registry = match VoiceRegistry::load(&settings.voices) {
        Ok(registry) => registry,
        Err(e) => {
            Output::error(&format!("Voice configuration is invalid: {}", e));
            Output::info(&format!(
                "References must be mono PCM WAV at {} Hz, at least {}s long.",
                settings.voices.sample_rate, settings.voices.min_reference_seconds
            ));
            return Err(e.into());
        }
    };

    Output::header(&format!("Voices ({})", registry.len()));
    for profile in registry.profiles() {
        let length = profile
            .reference_seconds
            .map(format_duration)
            .unwrap_or_else(|| "unknown length".to_string());
        Output::list_item(&format!(
            "{} ({}, speed {:.2}, {})",
            profile.id, profile.language, profile.speed, length
        ));
        Output::kv("Reference", &profile.reference.display().to_string());
        if !profile.description.is_empty() {
            Output::kv("Style", &profile.description);
        }
    }
    Ok(())
}
