//! Run command: create a job and drive it in the foreground.

use crate::cli::preflight::{self, Operation};
use crate::cli::{format_duration, Output};
use crate::config::Settings;
use crate::ingestion::SourceRef;
use crate::job::{JobStatus, Stage};
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Run the run command.
pub async fn run_generate(source: SourceRef, until: Stage, settings: Settings) -> Result<()> {
    if until >= Stage::Synthesizing {
        preflight::check(Operation::Generate)?;
        if let Err(e) = preflight::check_synthesis_endpoint(&settings).await {
            Output::warning(&e.to_string());
        }
    } else {
        preflight::check(Operation::Script)?;
    }

    let orchestrator = Arc::new(Orchestrator::new(settings)?);
    let pruned = orchestrator.prune_stale_segments().await?;
    if pruned > 0 {
        Output::info(&format!("Removed {} stale segment directories", pruned));
    }

    let id = orchestrator
        .create_job_with_target(source.clone(), until)
        .await?;
    Output::info(&format!("Created job {} for {}", id, source.describe()));

    let spinner = Output::spinner("Waiting to start");
    let mut drive = orchestrator.spawn_drive(id.clone(), until);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = &mut drive => break,
            _ = ticker.tick() => {
                if let Ok(status) = orchestrator.get_status(&id).await {
                    spinner.set_message(format!("{} ({:.0}%)", status.message, status.progress * 100.0));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                spinner.set_message("Cancelling, waiting for the current call to return...");
                if let Err(e) = orchestrator.cancel(&id).await {
                    Output::warning(&e.to_string());
                }
            }
        }
    }
    spinner.finish_and_clear();

    let status = orchestrator.get_status(&id).await?;
    Output::job_detail(&status);
    println!();

    match status.status {
        JobStatus::Succeeded => {
            let job = orchestrator.get_job(&id).await?;
            if let Some(timeline) = &job.timeline {
                Output::kv("Duration", &format_duration(timeline.total_duration_seconds()));
            }
            Output::success("Podcast ready.");
            Ok(())
        }
        JobStatus::Cancelled => {
            Output::warning("Job cancelled.");
            Ok(())
        }
        JobStatus::Failed => Err(anyhow::anyhow!("job {} failed", id)),
        JobStatus::Pending | JobStatus::Running => {
            Output::success(&format!("Stopped after {}.", status.stage));
            Output::info(&format!(
                "Continue later with: blogcast status {} --script",
                id
            ));
            Ok(())
        }
    }
}
