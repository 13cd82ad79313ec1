//! Jobs and purge commands.

use crate::cli::Output;
use crate::config::Settings;
use crate::job::create_job_store;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the jobs command.
pub async fn run_jobs(limit: usize, settings: Settings) -> Result<()> {
    let store = create_job_store(&settings)?;
    let jobs = store.list(limit).await?;

    if jobs.is_empty() {
        Output::info("No jobs yet. Use 'blogcast run <url>' to create one.");
        return Ok(());
    }

    Output::header(&format!("Jobs ({})", jobs.len()));
    println!();
    for job in &jobs {
        Output::job_row(&job.snapshot(None));
    }
    Ok(())
}

/// Run the purge command.
pub async fn run_purge(days: Option<u32>, settings: Settings) -> Result<()> {
    let days = days.unwrap_or(settings.pipeline.retention_days);
    let orchestrator = Orchestrator::new(settings)?;
    let removed = orchestrator
        .purge_terminal(chrono::Duration::days(i64::from(days)))
        .await?;

    if removed == 0 {
        Output::info(&format!("No finished jobs older than {} days.", days));
    } else {
        Output::success(&format!("Removed {} jobs older than {} days.", removed, days));
    }
    Ok(())
}
