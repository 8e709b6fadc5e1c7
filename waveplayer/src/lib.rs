//! waveplayer - streaming WAV playback over a buffer-queue audio device
//!
//! A WAV file is opened, an audio engine/output mix/player chain is built, and
//! the PCM payload is streamed through one reusable staging buffer: the device
//! hands each consumed buffer back, the session refills it from the file and
//! re-queues it, until the file is exhausted. Everything is then released
//! exactly once.
//!
//! ```no_run
//! # async fn run() -> waveplayer::Result<()> {
//! let mut handle = waveplayer::play("silence.wav")?;
//! let report = handle.wait().await?;
//! println!("{:?} after {} refills", report.end, report.stats.refills);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod error;
pub mod inspect;
pub mod session;
pub mod source;

pub use backend::{AudioBackend, CpalBackend, DeviceError, PlayerFormat};
pub use buffer::{BufferSizing, StagingBuffer};
pub use error::{Error, Result};
pub use session::{
    play, play_source, play_with, BootstrapStep, PlaybackHandle, PlaybackOptions, PlaybackReport,
    PlaybackStats, SessionEnd,
};
pub use source::{PcmFormat, PcmSource, SampleEncoding, WavSource};
