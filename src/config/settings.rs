//! Configuration settings for Blogcast.

use crate::error::{BlogcastError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub knowledge: KnowledgeSettings,
    pub refinement: RefinementSettings,
    pub synthesis: SynthesisSettings,
    pub voices: VoiceSettings,
    pub audio: AudioSettings,
    pub pipeline: PipelineSettings,
    pub jobs: JobStoreSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for rendered scripts, segments and final episodes.
    pub output_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.blogcast".to_string(),
            output_dir: "~/.blogcast/output".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Drafting and critique model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Model used to draft the script.
    pub draft_model: String,
    /// Model used by the critique passes (accuracy, storytelling, engagement).
    pub critique_model: String,
    /// Sampling temperature for drafting.
    pub draft_temperature: f32,
    /// Sampling temperature for critique passes.
    pub critique_temperature: f32,
    /// Source text is truncated to this many characters in prompts.
    pub max_source_chars: usize,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            draft_model: "gpt-4o".to_string(),
            critique_model: "gpt-4o".to_string(),
            draft_temperature: 0.7,
            critique_temperature: 0.3,
            max_source_chars: 8000,
            timeout_seconds: 300,
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Content chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Target chunk size in words.
    pub chunk_words: usize,
    /// Words carried over from the end of one chunk into the next.
    pub overlap_words: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_words: 600,
            overlap_words: 75,
        }
    }
}

/// Knowledge store backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for KnowledgeBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(KnowledgeBackend::Sqlite),
            "memory" => Ok(KnowledgeBackend::Memory),
            _ => Err(format!("Unknown knowledge backend: {}", s)),
        }
    }
}

/// Knowledge store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSettings {
    /// Vector store backend (sqlite, memory).
    pub backend: KnowledgeBackend,
    /// Path to the SQLite vector database.
    pub sqlite_path: String,
    /// Number of grounding chunks retrieved per pass.
    pub retrieval_k: usize,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            backend: KnowledgeBackend::Sqlite,
            sqlite_path: "~/.blogcast/knowledge.db".to_string(),
            retrieval_k: 8,
        }
    }
}

/// Refinement loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementSettings {
    /// Ordered editorial passes.
    pub passes: Vec<String>,
    /// How many times a pass may re-run after requesting a revision.
    pub max_retries_per_pass: u32,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            passes: vec![
                "draft".to_string(),
                "accuracy-check".to_string(),
                "storytelling".to_string(),
                "engagement".to_string(),
            ],
            max_retries_per_pass: 3,
        }
    }
}

/// Acoustic synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Acoustic model identifier, forwarded to the synthesis server.
    pub model: String,
    /// Base URL of the synthesis server.
    pub endpoint: String,
    /// Number of turns synthesized concurrently.
    pub worker_count: usize,
    /// Attempts per turn before the whole synthesis fails.
    pub max_attempts: u32,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Initial backoff between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            model: "tts_models/multilingual/multi-dataset/xtts_v2".to_string(),
            endpoint: "http://127.0.0.1:8020".to_string(),
            worker_count: 2,
            max_attempts: 3,
            timeout_seconds: 180,
            backoff_ms: 500,
        }
    }
}

/// One podcast host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Name used in the script ("Mike:").
    pub name: String,
    /// Path to the reference WAV sample used for voice cloning.
    pub reference: String,
    /// Language code passed to the acoustic model.
    pub language: String,
    /// Speaking rate multiplier.
    pub speed: f32,
    /// Free-form persona description.
    pub description: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            name: "Host".to_string(),
            reference: String::new(),
            language: "en".to_string(),
            speed: 1.0,
            description: String::new(),
        }
    }
}

/// Voice binding for both hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub host_a: HostSettings,
    pub host_b: HostSettings,
    /// Required sample rate of reference samples.
    pub sample_rate: u32,
    /// Minimum reference sample length in seconds.
    pub min_reference_seconds: f64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            host_a: HostSettings {
                name: "Mike".to_string(),
                reference: "~/.blogcast/voices/host_a.wav".to_string(),
                description: "Main presenter, confident and knowledgeable tone".to_string(),
                ..HostSettings::default()
            },
            host_b: HostSettings {
                name: "Sarah".to_string(),
                reference: "~/.blogcast/voices/host_b.wav".to_string(),
                description: "Co-host, curious and enthusiastic tone".to_string(),
                ..HostSettings::default()
            },
            sample_rate: 22050,
            min_reference_seconds: 6.0,
        }
    }
}

/// Final episode assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Silence inserted when the speaker changes.
    pub pause_between_speakers_ms: u32,
    /// Extra silence before a turn carrying a `[pause]` cue.
    pub cue_pause_ms: u32,
    /// Optional intro music.
    pub intro: Option<String>,
    /// Optional outro music.
    pub outro: Option<String>,
    /// MP3 bitrate for the final episode.
    pub bitrate: String,
    /// Apply loudness normalisation and silence trimming per segment.
    pub normalize: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            pause_between_speakers_ms: 400,
            cue_pause_ms: 800,
            intro: None,
            outro: None,
            bitrate: "192k".to_string(),
            normalize: true,
        }
    }
}

/// Job-level retry and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Attempts per stage for transient failures.
    pub stage_max_attempts: u32,
    /// Initial stage retry backoff in milliseconds.
    pub stage_backoff_ms: u64,
    /// Upper bound on the stage retry backoff in milliseconds.
    pub stage_backoff_max_ms: u64,
    /// Number of error records kept per job.
    pub error_log_limit: usize,
    /// Terminal jobs older than this are removed by `purge`.
    pub retention_days: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_max_attempts: 3,
            stage_backoff_ms: 1000,
            stage_backoff_max_ms: 30_000,
            error_log_limit: 20,
            retention_days: 30,
        }
    }
}

/// Job record persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStoreSettings {
    /// Path to the SQLite job database.
    pub sqlite_path: String,
}

impl Default for JobStoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.blogcast/jobs.db".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.refinement.passes.is_empty() {
            return Err(BlogcastError::Config(
                "refinement.passes must name at least one pass".to_string(),
            ));
        }
        if self.synthesis.worker_count == 0 {
            return Err(BlogcastError::Config(
                "synthesis.worker_count must be at least 1".to_string(),
            ));
        }
        if self.synthesis.max_attempts == 0 || self.pipeline.stage_max_attempts == 0 {
            return Err(BlogcastError::Config(
                "attempt ceilings must be at least 1".to_string(),
            ));
        }
        if self.voices.host_a.name == self.voices.host_b.name {
            return Err(BlogcastError::Config(
                "voices.host_a and voices.host_b need distinct names".to_string(),
            ));
        }
        Ok(())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BlogcastError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blogcast")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded output directory path.
    pub fn output_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.output_dir)
    }

    /// Directory holding per-job synthesized turn audio.
    pub fn segments_dir(&self) -> PathBuf {
        self.output_dir().join("segments")
    }

    /// Directory holding rendered scripts.
    pub fn scripts_dir(&self) -> PathBuf {
        self.output_dir().join("scripts")
    }

    /// Directory holding finished episodes.
    pub fn episodes_dir(&self) -> PathBuf {
        self.output_dir().join("episodes")
    }

    /// Get the expanded knowledge database path.
    pub fn knowledge_path(&self) -> PathBuf {
        Self::expand_path(&self.knowledge.sqlite_path)
    }

    /// Get the expanded job database path.
    pub fn jobs_path(&self) -> PathBuf {
        Self::expand_path(&self.jobs.sqlite_path)
    }
}
