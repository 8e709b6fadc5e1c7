//! Source inspection without touching the audio device

use crate::buffer::BufferSizing;
use crate::error::Result;
use crate::source::{PcmFormat, PcmSource, WavSource};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// What a playback session would see for a file
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub format: PcmFormat,
    pub data_bytes: u64,
    pub duration_secs: f64,
    /// Staging capacity under `sizing`
    pub staging_capacity: usize,
    pub sizing: String,
    /// Fill-and-submit cycles a full playback takes, primer included
    pub expected_refills: u64,
}

/// Open `path` and compute its playback parameters.
///
/// # Errors
/// `SourceOpen` for unreadable files, `InvalidSizing` when `sizing` yields no
/// usable capacity for the file's format.
pub fn describe(path: impl AsRef<Path>, sizing: BufferSizing) -> Result<SourceInfo> {
    let source = WavSource::open(path)?;
    let format = source.format();
    let staging_capacity = sizing.capacity_for(&format)?;
    let data_bytes = source.data_len();

    Ok(SourceInfo {
        path: source.path().to_path_buf(),
        format,
        data_bytes,
        duration_secs: source.duration().as_secs_f64(),
        staging_capacity,
        sizing: sizing.to_string(),
        expected_refills: data_bytes.div_ceil(staging_capacity as u64) + 1,
    })
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File:        {}", self.path.display())?;
        writeln!(
            f,
            "Format:      {} ch, {} Hz, {} bit {:?}",
            self.format.channels,
            self.format.sample_rate,
            self.format.bits_per_sample,
            self.format.encoding
        )?;
        writeln!(f, "Data:        {} bytes", self.data_bytes)?;
        writeln!(f, "Duration:    {:.3} s", self.duration_secs)?;
        writeln!(
            f,
            "Staging:     {} bytes ({})",
            self.staging_capacity, self.sizing
        )?;
        write!(f, "Refills:     {}", self.expected_refills)
    }
}
