//! Staging buffer and its sizing policy
//!
//! The staging buffer is the single reusable region PCM bytes are read into
//! before being handed to the device. It is an owned value: it moves into the
//! device's buffer queue on enqueue and comes back through the consumed-buffer
//! callback, so at any moment exactly one side can touch the bytes.

use crate::error::{Error, Result};
use crate::source::{PcmFormat, PcmSource};
use std::fmt;
use std::io;
use waveplayer_common::config::{PlaybackSettings, SizingMode};

/// How the staging buffer capacity is derived from the source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferSizing {
    /// `channels × sample_rate × bits_per_sample` bytes.
    ///
    /// This multiplies by bits rather than bytes, so it holds eight seconds of
    /// audio rather than one. Kept as the default for behavioural parity.
    #[default]
    Legacy,
    /// Real byte rate × `millis`, rounded down to whole frames
    Duration { millis: u32 },
    /// Explicit byte count, rounded down to whole frames
    Fixed { bytes: usize },
}

impl BufferSizing {
    /// Build from resolved configuration
    pub fn from_settings(settings: &PlaybackSettings) -> Result<Self> {
        match settings.buffer_sizing {
            SizingMode::Legacy => Ok(Self::Legacy),
            SizingMode::Duration => Ok(Self::Duration {
                millis: settings.buffer_ms,
            }),
            SizingMode::Fixed => settings
                .buffer_bytes
                .map(|bytes| Self::Fixed { bytes })
                .ok_or_else(|| {
                    Error::InvalidSizing("fixed sizing requires a byte count".to_string())
                }),
        }
    }

    /// Staging capacity in bytes for `format`.
    ///
    /// The result is always a non-zero multiple of the frame size so a read
    /// never splits a frame.
    pub fn capacity_for(&self, format: &PcmFormat) -> Result<usize> {
        let block = format.block_align();
        if block == 0 || format.sample_rate == 0 {
            return Err(Error::InvalidSizing(format!(
                "source format has no frames ({} ch, {} Hz, {} bit)",
                format.channels, format.sample_rate, format.bits_per_sample
            )));
        }

        let raw = match *self {
            Self::Legacy => (format.channels as u64)
                .saturating_mul(format.sample_rate as u64)
                .saturating_mul(format.bits_per_sample as u64),
            Self::Duration { millis } => format.byte_rate().saturating_mul(millis as u64) / 1000,
            Self::Fixed { bytes } => bytes as u64,
        };
        let raw = usize::try_from(raw)
            .map_err(|_| Error::InvalidSizing(format!("{} bytes exceeds address space", raw)))?;

        let aligned = raw - raw % block;
        if aligned == 0 {
            return Err(Error::InvalidSizing(format!(
                "{} yields {} bytes, smaller than one {} byte frame",
                self, raw, block
            )));
        }
        Ok(aligned)
    }
}

impl fmt::Display for BufferSizing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy sizing"),
            Self::Duration { millis } => write!(f, "{} ms sizing", millis),
            Self::Fixed { bytes } => write!(f, "fixed {} byte sizing", bytes),
        }
    }
}

/// Fixed-capacity PCM staging region plus the length of its valid prefix.
pub struct StagingBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl StagingBuffer {
    /// Reserve `capacity` bytes up front. The buffer is never resized.
    ///
    /// # Errors
    /// `Error::Allocation` if the memory cannot be reserved.
    pub fn allocate(capacity: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|_| Error::Allocation {
                requested: capacity,
            })?;
        bytes.resize(capacity, 0);
        Ok(Self { bytes, len: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Number of valid bytes from the last fill
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes from the last fill
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Overwrite the contents with the next bytes from `source`.
    ///
    /// Returns the number of bytes read; zero means end of stream.
    pub fn fill_from<S: PcmSource + ?Sized>(&mut self, source: &mut S) -> io::Result<usize> {
        self.len = 0;
        let n = source.read(&mut self.bytes)?;
        self.len = n.min(self.bytes.len());
        Ok(self.len)
    }
}

impl fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .finish()
    }
}
