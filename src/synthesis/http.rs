//! XTTS-compatible HTTP synthesis client.

use super::Synthesizer;
use crate::config::SynthesisSettings;
use crate::error::{BlogcastError, Result};
use crate::script::DialogueTurn;
use crate::voice::{inspect_wav, VoiceProfile};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    speaker_wav: String,
    language: &'a str,
    speed: f32,
    model: &'a str,
}

/// Synthesizer backed by a voice-cloning TTS server.
///
/// Posts each turn to `{endpoint}/tts_to_audio/` with the speaker's
/// reference sample and writes the returned WAV next to the other segments.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpSynthesizer {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| BlogcastError::Config(format!("Invalid synthesis endpoint '{}': {}", endpoint, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BlogcastError::Config(format!(
                "Synthesis endpoint must be http(s): {}",
                endpoint
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlogcastError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_settings(settings: &SynthesisSettings) -> Result<Self> {
        Self::new(
            &settings.endpoint,
            &settings.model,
            Duration::from_secs(settings.timeout_seconds),
        )
    }

    fn tts_url(&self) -> String {
        format!("{}/tts_to_audio/", self.endpoint)
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    #[instrument(skip(self, turn, voice), fields(turn_index = turn.turn_index, voice = %voice.id))]
    async fn synthesize(
        &self,
        turn: &DialogueTurn,
        voice: &VoiceProfile,
        output: &Path,
    ) -> Result<f64> {
        let request = TtsRequest {
            text: &turn.text,
            speaker_wav: voice.reference.display().to_string(),
            language: &voice.language,
            speed: voice.speed,
            model: &self.model,
        };

        let response = self
            .client
            .post(self.tts_url())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(BlogcastError::Transient(format!(
                "synthesis server returned no audio for turn {}",
                turn.turn_index
            )));
        }

        // Only a fully validated file ever lands at `output`.
        let partial = output.with_extension("wav.part");
        tokio::fs::write(&partial, &bytes).await?;
        let info = match inspect_wav(&partial) {
            Ok(info) => info,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(BlogcastError::Transient(format!(
                    "synthesis server returned invalid audio for turn {}: {}",
                    turn.turn_index, e
                )));
            }
        };
        tokio::fs::rename(&partial, output).await?;

        debug!(
            bytes = bytes.len(),
            seconds = info.duration_seconds,
            "Wrote segment {}",
            output.display()
        );
        Ok(info.duration_seconds)
    }
}
