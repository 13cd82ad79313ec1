//! Status and cancel commands.

use crate::cli::Output;
use crate::config::Settings;
use crate::job::{self, create_job_store};
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the status command.
pub async fn run_status(id: &str, show_script: bool, settings: Settings) -> Result<()> {
    let store = create_job_store(&settings)?;
    let job = job::require(store.as_ref(), id).await?;
    Output::job_detail(&job.snapshot(None));

    if show_script {
        match &job.script {
            Some(script) if !script.is_empty() => {
                Output::header(&format!("Script (revision {})", script.revision));
                for turn in &script.turns {
                    Output::turn(turn.turn_index, turn.speaker.as_str(), &turn.text, &turn.cues);
                }
            }
            _ => Output::info("No script yet."),
        }
    }

    Ok(())
}

/// Run the cancel command.
pub async fn run_cancel(id: &str, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let snapshot = orchestrator.cancel(id).await?;
    Output::success(&format!("Job {} {}", snapshot.id, snapshot.status));
    Ok(())
}
