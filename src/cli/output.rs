//! CLI output formatting utilities.

use crate::job::{JobSnapshot, JobStatus};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// One line per job, for `jobs`.
    pub fn job_row(job: &JobSnapshot) {
        println!(
            "  {} {} {} ({}, {:.0}%)",
            status_icon(job.status),
            style(&job.id).dim(),
            style(content_preview(job.title.as_deref().unwrap_or("untitled"), 48)).bold(),
            job.stage,
            job.progress * 100.0
        );
    }

    /// Full status block, for `status` and the end of `run`.
    pub fn job_detail(job: &JobSnapshot) {
        Output::header(job.title.as_deref().unwrap_or("Untitled job"));
        Output::kv("Id", &job.id);
        Output::kv("Status", &format!("{} {}", status_icon(job.status), job.status));
        Output::kv("Stage", &job.stage.to_string());
        Output::kv("Progress", &format!("{:.0}%", job.progress * 100.0));
        Output::kv("Message", &job.message);
        if let Some(turns) = job.turns {
            let revision = job.revision.unwrap_or_default();
            Output::kv("Script", &format!("{} turns, revision {}", turns, revision));
        }
        if let Some(artifact) = &job.artifact {
            Output::kv("Episode", &artifact.display().to_string());
        }
        if let Some(err) = &job.last_error {
            Output::kv(
                "Last error",
                &format!("[{:?}] {}: {}", err.class, err.stage, err.message),
            );
        }
        Output::kv("Updated", &job.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }

    /// Print a script turn.
    pub fn turn(index: usize, speaker: &str, text: &str, cues: &[String]) {
        let cues = if cues.is_empty() {
            String::new()
        } else {
            format!(" {}", style(format!("[{}]", cues.join(", "))).dim())
        };
        println!(
            "  {:>3} {}{} {}",
            style(index).dim(),
            style(speaker).cyan().bold(),
            cues,
            content_preview(text, 160)
        );
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(progress_style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            pb.set_style(progress_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

fn status_icon(status: JobStatus) -> StyledObject<&'static str> {
    match status {
        JobStatus::Pending => style("…").dim(),
        JobStatus::Running => style("~").cyan(),
        JobStatus::Succeeded => style("✓").green(),
        JobStatus::Failed => style("✗").red(),
        JobStatus::Cancelled => style("-").yellow(),
    }
}

/// Format duration in seconds to a human-readable string.
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Single-line preview, truncated on a char boundary.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42.7), "42s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3723.0), "1h 2m 3s");
    }

    #[test]
    fn test_content_preview_respects_char_boundaries() {
        assert_eq!(content_preview("short\nline", 20), "short line");
        assert_eq!(content_preview("héllo wörld", 5), "héllo...");
    }
}
