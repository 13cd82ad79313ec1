//! ffmpeg-backed episode renderer.

use super::{AssemblyItem, AssemblyPlan, PostProcessor};
use crate::config::AudioSettings;
use crate::error::{BlogcastError, Result};
use crate::synthesis::AudioTimeline;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Leading and trailing audio below this level is trimmed from each turn.
const SILENCE_THRESHOLD: &str = "-40dB";

/// Renders an [`AssemblyPlan`] with a single ffmpeg filter graph.
pub struct FfmpegPostProcessor {
    settings: AudioSettings,
    sample_rate: u32,
    program: String,
}

impl FfmpegPostProcessor {
    pub fn new(settings: AudioSettings, sample_rate: u32) -> Self {
        Self {
            settings,
            sample_rate,
            program: "ffmpeg".to_string(),
        }
    }

    /// Use a different ffmpeg binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Per-input filter chain, ending in the shared output format.
    fn input_filter(&self, item: &AssemblyItem) -> String {
        let format = format!(
            "aresample={},aformat=channel_layouts=mono",
            self.sample_rate
        );
        match item {
            AssemblyItem::Speech(_) if self.settings.normalize => format!(
                "silenceremove=start_periods=1:start_threshold={t},areverse,\
                 silenceremove=start_periods=1:start_threshold={t},areverse,\
                 loudnorm=I=-16:TP=-1.5:LRA=11,{f}",
                t = SILENCE_THRESHOLD,
                f = format
            ),
            _ => format,
        }
    }

    /// Full ffmpeg argument list for rendering `plan` to `output`.
    pub(crate) fn command_args(&self, plan: &AssemblyPlan, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into()];
        let mut graph = String::new();
        let mut labels = String::new();

        for (i, item) in plan.items.iter().enumerate() {
            match item {
                AssemblyItem::Music(path) | AssemblyItem::Speech(path) => {
                    args.push("-i".into());
                    args.push(path.as_os_str().to_owned());
                }
                AssemblyItem::Silence { ms } => {
                    args.push("-f".into());
                    args.push("lavfi".into());
                    args.push("-t".into());
                    args.push(format!("{:.3}", *ms as f64 / 1000.0).into());
                    args.push("-i".into());
                    args.push(format!("anullsrc=r={}:cl=mono", self.sample_rate).into());
                }
            }
            graph.push_str(&format!("[{}:a]{}[a{}];", i, self.input_filter(item), i));
            labels.push_str(&format!("[a{}]", i));
        }
        graph.push_str(&format!(
            "{}concat=n={}:v=0:a=1[out]",
            labels,
            plan.items.len()
        ));

        args.push("-filter_complex".into());
        args.push(graph.into());
        args.push("-map".into());
        args.push("[out]".into());
        args.push("-codec:a".into());
        args.push("libmp3lame".into());
        args.push("-b:a".into());
        args.push(self.settings.bitrate.clone().into());
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl PostProcessor for FfmpegPostProcessor {
    #[instrument(skip(self, timeline), fields(segments = timeline.segments.len(), output = %output.display()))]
    async fn assemble(&self, timeline: &AudioTimeline, output: &Path) -> Result<PathBuf> {
        if timeline.is_empty() {
            return Err(BlogcastError::PostProcess(
                "timeline has no segments".to_string(),
            ));
        }
        if let Some(missing) = timeline.segments.iter().find(|s| !s.location.exists()) {
            return Err(BlogcastError::PostProcess(format!(
                "segment for turn {} is missing: {}",
                missing.turn_index,
                missing.location.display()
            )));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let plan = AssemblyPlan::build(timeline, &self.settings);
        let partial = output.with_extension("part.mp3");
        debug!(
            items = plan.items.len(),
            silence_ms = plan.silence_ms(),
            "Rendering episode"
        );

        let result = Command::new(&self.program)
            .args(self.command_args(&plan, &partial))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => {}
            Ok(out) => {
                let _ = tokio::fs::remove_file(&partial).await;
                let err = String::from_utf8_lossy(&out.stderr);
                return Err(BlogcastError::PostProcess(format!(
                    "ffmpeg assembly failed: {}",
                    err.trim()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlogcastError::ToolNotFound(self.program.clone()));
            }
            Err(e) => return Err(BlogcastError::PostProcess(format!("ffmpeg error: {}", e))),
        }

        tokio::fs::rename(&partial, output).await?;
        info!(
            "Episode assembled: {} ({:.1} seconds of speech)",
            output.display(),
            timeline.total_duration_seconds()
        );
        Ok(output.to_path_buf())
    }
}
