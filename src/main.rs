//! Blogcast CLI entry point.

use anyhow::Result;
use blogcast::cli::{commands, source_from_args, Cli, Commands};
use blogcast::config::Settings;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    // Initialize logging
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("blogcast={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.output_dir())?;

    // Execute command
    match cli.command {
        Commands::Serve { host, port } => {
            commands::run_serve(host, port, settings).await?;
        }

        Commands::Run {
            input,
            title,
            markdown,
            text,
            until,
        } => {
            let source = source_from_args(&input, title, markdown, text)?;
            commands::run_generate(source, until, settings).await?;
        }

        Commands::Status { id, script } => {
            commands::run_status(&id, script, settings).await?;
        }

        Commands::Cancel { id } => {
            commands::run_cancel(&id, settings).await?;
        }

        Commands::Jobs { limit } => {
            commands::run_jobs(limit, settings).await?;
        }

        Commands::Purge { days } => {
            commands::run_purge(days, settings).await?;
        }

        Commands::Voices => {
            commands::run_voices(&settings)?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings, config_path)?;
        }
    }

    Ok(())
}
