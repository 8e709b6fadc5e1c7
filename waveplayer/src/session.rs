//! Streaming playback session
//!
//! A session owns one WAV source, one chain of device objects and one staging
//! buffer. It is built by [`play_source`] in fourteen strictly ordered steps,
//! primed with a single fill-and-submit, and from then on re-entered by the
//! device once per consumed buffer until the source runs dry.
//!
//! # Ownership
//!
//! - Bootstrap keeps every acquired resource in a local. An early `?` return
//!   drops the locals in reverse declaration order, which is reverse
//!   acquisition order, so partial setups unwind without flag checks.
//! - The staging buffer moves into the device on enqueue and comes back
//!   through the consumed-buffer callback. A refill can only start once the
//!   device has returned the previous buffer.
//! - The running session sits in a shared slot. Teardown `take()`s it out of
//!   the slot, which makes it happen at most once however it is triggered.

use crate::backend::{
    AudioBackend, AudioObject, BufferQueue, CpalBackend, DeviceError, DeviceResult,
    PlayInterface, PlayState, PlayerFormat, QueueEvent,
};
use crate::buffer::{BufferSizing, StagingBuffer};
use crate::error::{Error, Result};
use crate::source::{PcmFormat, PcmSource, WavSource};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Acquisition steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapStep {
    OpenSource,
    CreateEngine,
    RealizeEngine,
    EngineInterface,
    CreateOutputMix,
    RealizeOutputMix,
    AllocateBuffer,
    CreatePlayer,
    RealizePlayer,
    BufferQueue,
    RegisterCallback,
    PlayInterface,
    SetPlaying,
    Prime,
}

impl BootstrapStep {
    pub const ALL: [BootstrapStep; 14] = [
        Self::OpenSource,
        Self::CreateEngine,
        Self::RealizeEngine,
        Self::EngineInterface,
        Self::CreateOutputMix,
        Self::RealizeOutputMix,
        Self::AllocateBuffer,
        Self::CreatePlayer,
        Self::RealizePlayer,
        Self::BufferQueue,
        Self::RegisterCallback,
        Self::PlayInterface,
        Self::SetPlaying,
        Self::Prime,
    ];

    /// 1-based position in the bootstrap sequence
    pub fn number(&self) -> usize {
        Self::ALL
            .iter()
            .position(|step| step == self)
            .map_or(0, |index| index + 1)
    }

    fn description(&self) -> &'static str {
        match self {
            Self::OpenSource => "open WAV source",
            Self::CreateEngine => "create engine",
            Self::RealizeEngine => "realize engine",
            Self::EngineInterface => "get engine interface",
            Self::CreateOutputMix => "create output mix",
            Self::RealizeOutputMix => "realize output mix",
            Self::AllocateBuffer => "allocate staging buffer",
            Self::CreatePlayer => "create buffer-queue player",
            Self::RealizePlayer => "realize player",
            Self::BufferQueue => "get buffer-queue interface",
            Self::RegisterCallback => "register refill callback",
            Self::PlayInterface => "get play interface",
            Self::SetPlaying => "set play state to playing",
            Self::Prime => "prime buffer queue",
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}: {}", self.number(), self.description())
    }
}

/// Tunables for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackOptions {
    pub buffer_sizing: BufferSizing,
}

/// Why a session tore down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// Source exhausted
    Completed,
    /// Source read failed mid-stream; handled like end of stream
    ReadFailed,
    /// Device rejected an enqueue or reported a stream failure
    DeviceFailed,
    /// `PlaybackHandle::stop` was called
    Stopped,
}

/// Counters kept by the refill loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlaybackStats {
    /// Fill-and-submit cycles, including the primer
    pub refills: u64,
    pub enqueues: u64,
    pub bytes_submitted: u64,
}

/// Published once, when the session tears down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackReport {
    pub end: SessionEnd,
    pub stats: PlaybackStats,
}

/// Result of one fill-and-submit cycle
enum Refill {
    Submitted,
    EndOfStream(StagingBuffer),
    ReadFailed(StagingBuffer, std::io::Error),
    EnqueueFailed(DeviceError),
}

/// The player object and the interfaces obtained from it.
///
/// Field order is drop order: interfaces go before the object they belong to.
struct PlayerResources<B: AudioBackend> {
    play: B::Play,
    queue: B::Queue,
    object: B::Player,
}

/// A running session.
///
/// The staging buffer is not a field: it is either travelling through the
/// device or being filled by the refill in progress.
struct Session<S, B: AudioBackend> {
    player: PlayerResources<B>,
    output_mix: B::OutputMix,
    engine: B::Engine,
    source: S,
    stats: PlaybackStats,
    report: watch::Sender<Option<PlaybackReport>>,
}

type Slot<S, B> = Mutex<Option<Session<S, B>>>;

impl<S: PcmSource, B: AudioBackend> Session<S, B> {
    /// Read the next chunk into `buffer` and hand exactly the bytes read to
    /// the device. Shared by the primer and every device-triggered refill.
    fn fill_and_submit(&mut self, mut buffer: StagingBuffer) -> Refill {
        self.stats.refills += 1;

        let read = match buffer.fill_from(&mut self.source) {
            Ok(0) => return Refill::EndOfStream(buffer),
            Ok(n) => n,
            Err(e) => return Refill::ReadFailed(buffer, e),
        };

        match self.player.queue.enqueue(buffer) {
            Ok(()) => {
                self.stats.enqueues += 1;
                self.stats.bytes_submitted += read as u64;
                trace!("Enqueued {} bytes (refill {})", read, self.stats.refills);
                Refill::Submitted
            }
            Err(e) => Refill::EnqueueFailed(e),
        }
    }

    /// Release everything in dependency order: player, staging buffer,
    /// output mix, engine, source. Consumes the session.
    fn teardown(self, spare: Option<StagingBuffer>, end: SessionEnd) {
        let Session {
            player,
            output_mix,
            engine,
            source,
            stats,
            report,
        } = self;

        drop(player);
        debug!("Released player");
        drop(spare);
        debug!("Freed staging buffer");
        drop(output_mix);
        debug!("Released output mix");
        drop(engine);
        debug!("Released engine");
        drop(source);

        info!(
            "Playback session ended ({:?}): {} refills, {} enqueues, {} bytes",
            end, stats.refills, stats.enqueues, stats.bytes_submitted
        );
        report.send_replace(Some(PlaybackReport { end, stats }));
    }
}

/// Decide whether a refill outcome ends the session
fn conclude(outcome: Refill) -> Option<(Option<StagingBuffer>, SessionEnd)> {
    match outcome {
        Refill::Submitted => None,
        Refill::EndOfStream(buffer) => {
            debug!("End of stream");
            Some((Some(buffer), SessionEnd::Completed))
        }
        Refill::ReadFailed(buffer, e) => {
            warn!("Source read failed, ending playback: {}", e);
            Some((Some(buffer), SessionEnd::ReadFailed))
        }
        Refill::EnqueueFailed(e) => {
            error!("Enqueue failed, ending playback: {}", e);
            Some((None, SessionEnd::DeviceFailed))
        }
    }
}

/// One refill cycle against the shared slot.
///
/// Teardown runs after the lock is released. A buffer returned after teardown
/// is simply dropped.
fn refill<S: PcmSource, B: AudioBackend>(
    slot: &Slot<S, B>,
    buffer: StagingBuffer,
) -> DeviceResult<()> {
    let mut guard = slot.lock();
    let Some(session) = guard.as_mut() else {
        debug!("Buffer returned after teardown, dropping it");
        return Ok(());
    };

    let outcome = session.fill_and_submit(buffer);
    let device_error = match &outcome {
        Refill::EnqueueFailed(e) => Some(e.clone()),
        _ => None,
    };

    if let Some((spare, end)) = conclude(outcome) {
        let finished = guard.take();
        drop(guard);
        if let Some(session) = finished {
            session.teardown(spare, end);
        }
    }

    device_error.map_or(Ok(()), Err)
}

/// Stop the device, drop whatever it still holds and tear down.
///
/// No-op if the session already ended.
fn halt<S: PcmSource, B: AudioBackend>(slot: &Slot<S, B>, end: SessionEnd) {
    let Some(mut session) = slot.lock().take() else {
        return;
    };

    if let Err(e) = session.player.play.set_play_state(PlayState::Stopped) {
        warn!("Failed to stop player: {}", e);
    }
    if let Err(e) = session.player.queue.clear() {
        warn!("Failed to flush buffer queue: {}", e);
    }
    session.teardown(None, end);
}

/// Object-safe control surface over a typed session slot
trait SessionControl: Send + Sync {
    fn stop(&self);
}

impl<S: PcmSource, B: AudioBackend + 'static> SessionControl for Slot<S, B> {
    fn stop(&self) {
        info!("Stopping playback");
        halt(self, SessionEnd::Stopped);
    }
}

/// Handle to a started session.
///
/// Dropping the handle detaches it: playback carries on and tears itself down
/// at end of stream.
pub struct PlaybackHandle {
    control: Arc<dyn SessionControl>,
    report: watch::Receiver<Option<PlaybackReport>>,
    format: PcmFormat,
    capacity: usize,
}

impl PlaybackHandle {
    /// Format reported by the source at open time
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Staging buffer capacity in bytes
    pub fn staging_capacity(&self) -> usize {
        self.capacity
    }

    /// Final report, once the session has torn down
    pub fn report(&self) -> Option<PlaybackReport> {
        *self.report.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.report().is_some()
    }

    /// Flush the device queue and tear the session down now.
    ///
    /// No-op if the session already ended.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Wait for teardown and return the report
    pub async fn wait(&mut self) -> Result<PlaybackReport> {
        let report = self
            .report
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Playback("session dropped without a report".to_string()))?;
        (*report).ok_or_else(|| Error::Playback("session report missing".to_string()))
    }
}

impl fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("format", &self.format)
            .field("capacity", &self.capacity)
            .field("report", &self.report())
            .finish()
    }
}

/// Play a WAV file on the default output device.
pub fn play(path: impl AsRef<Path>) -> Result<PlaybackHandle> {
    play_with(path, &CpalBackend::default(), PlaybackOptions::default())
}

/// Play a WAV file through `backend`.
pub fn play_with<B: AudioBackend + 'static>(
    path: impl AsRef<Path>,
    backend: &B,
    options: PlaybackOptions,
) -> Result<PlaybackHandle> {
    let source = WavSource::open(path).map_err(|e| {
        error!("Bootstrap failed at {}: {}", BootstrapStep::OpenSource, e);
        e
    })?;
    debug!("Bootstrap {} ok", BootstrapStep::OpenSource);
    play_source(source, backend, options)
}

/// Build a session around an already open source (steps 2–14).
///
/// Returns once the first chunk is queued. An empty source tears down during
/// the primer and still returns `Ok`; the handle then already holds the report.
pub fn play_source<S: PcmSource, B: AudioBackend + 'static>(
    source: S,
    backend: &B,
    options: PlaybackOptions,
) -> Result<PlaybackHandle> {
    let format = source.format();

    let mut engine = checked(BootstrapStep::CreateEngine, backend.create_engine())?;
    checked(BootstrapStep::RealizeEngine, engine.realize())?;
    let engine_itf = checked(
        BootstrapStep::EngineInterface,
        backend.engine_interface(&engine),
    )?;

    let mut output_mix = checked(
        BootstrapStep::CreateOutputMix,
        backend.create_output_mix(&engine_itf),
    )?;
    checked(BootstrapStep::RealizeOutputMix, output_mix.realize())?;

    let staging = options
        .buffer_sizing
        .capacity_for(&format)
        .and_then(StagingBuffer::allocate)
        .map_err(|e| {
            error!("Bootstrap failed at {}: {}", BootstrapStep::AllocateBuffer, e);
            e
        })?;
    let capacity = staging.capacity();
    debug!(
        "Bootstrap {} ok: {} bytes ({})",
        BootstrapStep::AllocateBuffer,
        capacity,
        options.buffer_sizing
    );

    let player_format = PlayerFormat::for_source(&format);
    let mut player = checked(
        BootstrapStep::CreatePlayer,
        backend.create_player(&engine_itf, &player_format, &output_mix),
    )?;
    checked(BootstrapStep::RealizePlayer, player.realize())?;

    let mut queue = checked(BootstrapStep::BufferQueue, backend.buffer_queue(&player))?;

    let slot: Arc<Slot<S, B>> = Arc::new(Mutex::new(None));
    let callback_slot = Arc::clone(&slot);
    checked(
        BootstrapStep::RegisterCallback,
        queue.register_callback(Box::new(move |event| match event {
            QueueEvent::Consumed(buffer) => {
                // Failures are logged and already tore the session down.
                let _ = refill(&callback_slot, buffer);
            }
            QueueEvent::Failed(e) => {
                error!("Audio device failed during playback: {}", e);
                halt(&callback_slot, SessionEnd::DeviceFailed);
            }
        })),
    )?;

    let mut play = checked(BootstrapStep::PlayInterface, backend.play_interface(&player))?;
    checked(BootstrapStep::SetPlaying, play.set_play_state(PlayState::Playing))?;

    let (report_tx, report_rx) = watch::channel(None);
    *slot.lock() = Some(Session {
        player: PlayerResources {
            play,
            queue,
            object: player,
        },
        output_mix,
        engine,
        source,
        stats: PlaybackStats::default(),
        report: report_tx,
    });

    // The device only calls back after consuming a buffer, so nothing plays
    // until the first one is queued by hand.
    refill(&slot, staging).map_err(|e| Error::DeviceInit {
        step: BootstrapStep::Prime,
        reason: e.to_string(),
    })?;
    debug!("Bootstrap {} ok", BootstrapStep::Prime);

    info!(
        "Playback started: {} ch, {} Hz, {} bit, {} byte staging buffer",
        format.channels, format.sample_rate, format.bits_per_sample, capacity
    );

    Ok(PlaybackHandle {
        control: slot,
        report: report_rx,
        format,
        capacity,
    })
}

/// Map a device result to a bootstrap error for `step`
fn checked<T>(step: BootstrapStep, result: DeviceResult<T>) -> Result<T> {
    match result {
        Ok(value) => {
            debug!("Bootstrap {} ok", step);
            Ok(value)
        }
        Err(e) => {
            error!("Bootstrap failed at {}: {}", step, e);
            Err(Error::DeviceInit {
                step,
                reason: e.to_string(),
            })
        }
    }
}
