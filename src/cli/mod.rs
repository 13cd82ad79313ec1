//! CLI module for Blogcast.

pub mod commands;
mod output;
pub mod preflight;

pub use output::{format_duration, Output};

use crate::ingestion::SourceRef;
use crate::job::Stage;
use clap::{Parser, Subcommand};

/// Blogcast - turn blog posts into two-host podcast episodes
///
/// Fetches a post, writes a grounded dialogue script through a series of
/// editorial passes, and voices it with two cloned host voices.
#[derive(Parser, Debug)]
#[command(name = "blogcast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "BLOGCAST_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create a job for a blog post and drive it in the foreground
    Run {
        /// URL of the post, or a file path with --text / --markdown
        input: String,

        /// Episode title (defaults to the page title or file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Treat input as a markdown file
        #[arg(long, conflicts_with = "text")]
        markdown: bool,

        /// Treat input as a plain text file
        #[arg(long)]
        text: bool,

        /// Stop after this stage (e.g. refining for a script only)
        #[arg(long, default_value = "succeeded")]
        until: Stage,
    },

    /// Show the status of a job
    Status {
        /// Job id
        id: String,

        /// Also print the current script
        #[arg(long)]
        script: bool,
    },

    /// Cancel a job
    Cancel {
        /// Job id
        id: String,
    },

    /// List recent jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete finished jobs and their files
    Purge {
        /// Remove jobs last updated more than this many days ago (defaults to pipeline.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Validate and list the configured host voices
    Voices,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the default configuration file if none exists
    Init,

    /// Show configuration file path
    Path,
}

/// Build a source reference from `run` arguments.
pub fn source_from_args(
    input: &str,
    title: Option<String>,
    markdown: bool,
    text: bool,
) -> std::io::Result<SourceRef> {
    if !markdown && !text {
        return Ok(SourceRef::Url {
            url: input.to_string(),
            title,
        });
    }

    let body = std::fs::read_to_string(input)?;
    let title = title.or_else(|| {
        std::path::Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['-', '_'], " "))
    });
    Ok(if markdown {
        SourceRef::Markdown { body, title }
    } else {
        SourceRef::Text { body, title }
    })
}
