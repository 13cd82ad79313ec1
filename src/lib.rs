//! Blogcast - blog posts to two-host podcast episodes
//!
//! A durable pipeline that turns a written post into a conversational audio
//! episode between two cloned host voices.
//!
//! # Overview
//!
//! Each conversion is a [`job::Job`] that moves through five stages:
//!
//! 1. **Ingesting** - fetch and normalise the post
//! 2. **Retrieving** - chunk and embed it into the knowledge store
//! 3. **Refining** - draft a dialogue and run it through editorial passes,
//!    each grounded in retrieved source passages
//! 4. **Synthesizing** - voice every turn on a bounded worker pool
//! 5. **PostProcessing** - assemble the turns into one MP3
//!
//! Every stage transition is persisted, so a job interrupted by a restart
//! resumes from its last completed stage.
//!
//! # Architecture
//!
//! - `config` - Settings and editorial prompts
//! - `ingestion` - Source references and text extraction
//! - `chunking` / `embedding` / `knowledge` - Knowledge Store Adapter
//! - `script` - Dialogue documents and parsing
//! - `refinement` - Refinement Loop over editorial passes
//! - `voice` - Host voice profiles
//! - `synthesis` - Synthesis Scheduler
//! - `postprocess` - Episode assembly
//! - `job` - Job records and persistence
//! - `orchestrator` - Job Orchestrator
//!
//! # Example
//!
//! ```rust,no_run
//! use blogcast::config::Settings;
//! use blogcast::ingestion::SourceRef;
//! use blogcast::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let id = orchestrator
//!         .create_job(SourceRef::Url {
//!             url: "https://example.com/why-rust".to_string(),
//!             title: None,
//!         })
//!         .await?;
//!     let status = orchestrator.run_to_completion(&id).await?;
//!     println!("{}: {:?}", status.status, status.artifact);
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingestion;
pub mod job;
pub mod knowledge;
pub mod openai;
pub mod orchestrator;
pub mod postprocess;
pub mod refinement;
pub mod retry;
pub mod script;
pub mod synthesis;
pub mod voice;

pub use error::{BlogcastError, Result};
