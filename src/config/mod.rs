//! Configuration module for Blogcast.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{PassPrompt, Prompts, RefinementPrompts};
pub use settings::{
    AudioSettings, ChunkingSettings, EmbeddingSettings, GeneralSettings, HostSettings,
    JobStoreSettings, KnowledgeBackend, KnowledgeSettings, LlmSettings, PipelineSettings,
    PromptSettings, RefinementSettings, ServerSettings, Settings, SynthesisSettings,
    VoiceSettings,
};
