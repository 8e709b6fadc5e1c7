//! WAV source: header parsing via hound, raw PCM byte reads
//!
//! hound validates the RIFF/WAVE header and locates the data chunk. After
//! that the session reads the data chunk as raw little-endian PCM bytes, since
//! the output device consumes the file's own sample layout unchanged.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Integer or IEEE float samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    Int,
    Float,
}

/// PCM layout reported by a source at open time. Immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PcmFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl PcmFormat {
    /// Bytes occupied by one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }

    /// Bytes per frame (one sample for every channel)
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    /// True PCM throughput in bytes per second
    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Playback time represented by `bytes` of PCM data
    pub fn duration_of(&self, bytes: u64) -> Duration {
        let rate = self.byte_rate();
        if rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / rate as f64)
    }
}

impl From<hound::WavSpec> for PcmFormat {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            encoding: match spec.sample_format {
                hound::SampleFormat::Int => SampleEncoding::Int,
                hound::SampleFormat::Float => SampleEncoding::Float,
            },
        }
    }
}

/// Sequential PCM byte stream consumed by a playback session.
pub trait PcmSource: Send + 'static {
    /// Format of the bytes returned by `read`
    fn format(&self) -> PcmFormat;

    /// Read up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` at end of stream. Implementations fill the whole buffer
    /// unless the stream ends first.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// An open WAV file positioned at its data chunk.
pub struct WavSource {
    path: PathBuf,
    format: PcmFormat,
    data_len: u64,
    reader: io::Take<BufReader<File>>,
}

impl WavSource {
    /// Open and validate a WAV file.
    ///
    /// # Errors
    /// `Error::SourceOpen` carrying hound's message when the path does not
    /// exist, cannot be read, or is not a WAV file hound understands. Samples
    /// stored in containers wider than their bit depth (24 valid bits in 4
    /// bytes) are rejected too, since the device is fed packed samples.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let open_error =
            |e: &dyn std::fmt::Display| Error::SourceOpen(format!("{}: {}", path.display(), e));
        let reader = hound::WavReader::open(path).map_err(|e| open_error(&e))?;

        let format = PcmFormat::from(reader.spec());
        let samples = reader.len() as u64;
        let mut inner = reader.into_inner();

        let container = container_bytes(&mut inner, samples).map_err(|e| open_error(&e))?;
        if let Some(container) = container {
            if container != format.bytes_per_sample() as u64 {
                return Err(open_error(&format!(
                    "{}-bit samples in {}-byte containers are not supported",
                    format.bits_per_sample, container
                )));
            }
        }
        let data_len = samples * format.bytes_per_sample() as u64;

        info!(
            "Opened {}: {} ch, {} Hz, {} bit, {} data bytes",
            path.display(),
            format.channels,
            format.sample_rate,
            format.bits_per_sample,
            data_len
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            data_len,
            reader: inner.take(data_len),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the PCM data chunk in bytes
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data_len)
    }
}

/// Bytes each sample occupies in the data chunk, from the chunk's length field.
///
/// `reader` must sit at the first data byte; it is left there. `None` when the
/// file holds no samples.
fn container_bytes<R: Read + Seek>(reader: &mut R, samples: u64) -> io::Result<Option<u64>> {
    if samples == 0 {
        return Ok(None);
    }
    let data_start = reader.stream_position()?;
    let Some(len_field) = data_start.checked_sub(4) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "data chunk header missing",
        ));
    };

    let mut len = [0u8; 4];
    reader.seek(SeekFrom::Start(len_field))?;
    reader.read_exact(&mut len)?;
    reader.seek(SeekFrom::Start(data_start))?;

    Ok(Some(u32::from_le_bytes(len) as u64 / samples))
}

impl PcmSource for WavSource {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Hand back what we have; the next read reports the error.
                Err(_) if filled > 0 => break,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Drop for WavSource {
    fn drop(&mut self) {
        debug!("Closed WAV source {}", self.path.display());
    }
}
