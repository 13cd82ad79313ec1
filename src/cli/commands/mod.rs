//! CLI command implementations.

mod config;
mod jobs;
mod run;
mod serve;
mod status;
mod voices;

pub use config::run_config;
pub use jobs::{run_jobs, run_purge};
pub use run::run_generate;
pub use serve::run_serve;
pub use status::{run_cancel, run_status};
pub use voices::run_voices;
