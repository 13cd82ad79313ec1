//! WAV header inspection.

use std::path::Path;

/// Format summary of a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Integer PCM samples (as opposed to IEEE float).
    pub is_pcm: bool,
    pub duration_seconds: f64,
}

/// Read the header of a WAV file.
pub fn inspect_wav(path: &Path) -> std::result::Result<WavInfo, hound::Error> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let duration_seconds = if spec.sample_rate == 0 {
        0.0
    } else {
        reader.duration() as f64 / spec.sample_rate as f64
    };

    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        is_pcm: spec.sample_format == hound::SampleFormat::Int,
        duration_seconds,
    })
}
