//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and configuration are available
//! before starting a job that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{BlogcastError, Result};
use crate::openai;
use std::process::Command;
use std::time::Duration;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Full episode generation needs the API key, ffmpeg and the synthesis server.
    Generate,
    /// Script-only runs need the API key.
    Script,
    /// Reading job records has no external requirements.
    Inspect,
}

/// Run the synchronous pre-flight checks for the given operation.
pub fn check(operation: Operation) -> Result<()> {
    match operation {
        Operation::Generate => {
            check_api_key()?;
            check_tool("ffmpeg")?;
        }
        Operation::Script => {
            check_api_key()?;
        }
        Operation::Inspect => {}
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    if openai::is_api_key_configured() {
        return Ok(());
    }
    Err(BlogcastError::Config(
        "OPENAI_API_KEY is not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
    ))
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    match Command::new(name).arg("-version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(BlogcastError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BlogcastError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(BlogcastError::ToolNotFound(format!("{}: {}", name, e))),
    }
}

/// Check that the synthesis server accepts connections.
///
/// Any HTTP response counts; only connection failures are reported.
pub async fn check_synthesis_endpoint(settings: &Settings) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    match client.get(&settings.synthesis.endpoint).send().await {
        Ok(_) => Ok(()),
        Err(e) => Err(BlogcastError::Synthesis(format!(
            "synthesis server at {} is not reachable: {}",
            settings.synthesis.endpoint, e
        ))),
    }
}
