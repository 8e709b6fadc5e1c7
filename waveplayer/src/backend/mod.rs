//! Audio output device seam
//!
//! Models a buffer-queue audio API as a chain of objects, each created from
//! the one before it:
//!
//! ```text
//! engine ─► engine interface ─► output mix ─► player ─┬─► buffer queue
//!                                                     └─► play interface
//! ```
//!
//! Objects start inert and must be realized before use. Every handle releases
//! its platform resource when dropped, so dropping a chain in reverse order of
//! creation is the teardown. A handle that was never created has nothing to
//! release.

pub mod output;

use crate::buffer::StagingBuffer;
use crate::source::{PcmFormat, SampleEncoding};
use std::fmt;
use thiserror::Error;

pub use self::output::CpalBackend;

/// Buffers the device may hold at once. One buffer is in flight at a time.
pub const QUEUE_DEPTH: u32 = 1;

/// Platform failure reported by any device operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeviceError {
    message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Player state set through the play interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
}

/// Data format a player is created with.
///
/// The sample rate is carried in milliHertz, the fixed-point unit of
/// embedded buffer-queue audio APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerFormat {
    pub channels: u16,
    pub sample_rate_millihz: u32,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
    pub queue_depth: u32,
}

impl PlayerFormat {
    /// Device format for a source format, with the rate scaled to milliHertz
    pub fn for_source(format: &PcmFormat) -> Self {
        Self {
            channels: format.channels,
            sample_rate_millihz: format.sample_rate.saturating_mul(1000),
            bits_per_sample: format.bits_per_sample,
            encoding: format.encoding,
            queue_depth: QUEUE_DEPTH,
        }
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_millihz / 1000
    }
}

impl fmt::Display for PlayerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch, {} mHz, {} bit {:?}",
            self.channels, self.sample_rate_millihz, self.bits_per_sample, self.encoding
        )
    }
}

/// Notification delivered through the buffer-queue callback
#[derive(Debug)]
pub enum QueueEvent {
    /// The device finished playing this buffer and hands it back for refilling
    Consumed(StagingBuffer),
    /// The device stopped working; no further buffers will come back
    Failed(DeviceError),
}

/// Called by the device once per [`QueueEvent`]. Calls are serialized.
pub type QueueCallback = Box<dyn FnMut(QueueEvent) + Send + 'static>;

/// An object that is created inert and activated by `realize`
pub trait AudioObject: Send + 'static {
    fn realize(&mut self) -> DeviceResult<()>;
}

/// Buffer-queue interface of a player
pub trait BufferQueue: Send + 'static {
    /// Install the queue callback. Notifications are serialized.
    fn register_callback(&mut self, callback: QueueCallback) -> DeviceResult<()>;

    /// Hand a filled buffer to the device. The device plays `buffer.filled()`.
    fn enqueue(&mut self, buffer: StagingBuffer) -> DeviceResult<()>;

    /// Drop any queued or partially played buffer without notification
    fn clear(&mut self) -> DeviceResult<()>;
}

/// Play-state interface of a player
pub trait PlayInterface: Send + 'static {
    fn set_play_state(&mut self, state: PlayState) -> DeviceResult<()>;
}

/// A platform audio backend.
pub trait AudioBackend {
    type Engine: AudioObject;
    type EngineInterface;
    type OutputMix: AudioObject;
    type Player: AudioObject;
    type Queue: BufferQueue;
    type Play: PlayInterface;

    fn create_engine(&self) -> DeviceResult<Self::Engine>;

    /// Requires a realized engine
    fn engine_interface(&self, engine: &Self::Engine) -> DeviceResult<Self::EngineInterface>;

    fn create_output_mix(&self, engine: &Self::EngineInterface) -> DeviceResult<Self::OutputMix>;

    /// Requires a realized output mix
    fn create_player(
        &self,
        engine: &Self::EngineInterface,
        format: &PlayerFormat,
        output_mix: &Self::OutputMix,
    ) -> DeviceResult<Self::Player>;

    /// Requires a realized player
    fn buffer_queue(&self, player: &Self::Player) -> DeviceResult<Self::Queue>;

    /// Requires a realized player
    fn play_interface(&self, player: &Self::Player) -> DeviceResult<Self::Play>;
}
