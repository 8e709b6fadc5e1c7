//! Audio output using cpal
//!
//! Maps the buffer-queue object chain onto cpal:
//!
//! | Object        | cpal                                             |
//! |---------------|--------------------------------------------------|
//! | engine        | host (`cpal::default_host()`)                    |
//! | output mix    | output device (default, or by name)              |
//! | player        | raw output stream, owned by a dedicated thread   |
//! | buffer queue  | hand-off channels + refill dispatcher thread     |
//! | play          | `Stream::play` / `Stream::pause` via the thread  |
//!
//! The stream is built with the source's own sample format so PCM bytes are
//! copied to the device unchanged. 24-bit packed samples are widened to I32.
//!
//! Threads:
//! - `waveplayer-output` owns the `cpal::Stream` (it is not `Send`) and
//!   executes play-state commands.
//! - cpal's audio thread runs [`Renderer::render`], which drains the in-flight
//!   buffer and hands it back one period after its last bytes were written.
//! - `waveplayer-refill` receives returned buffers and stream failures and runs
//!   the registered callback, one event at a time. Reading the next chunk
//!   happens here, never on the audio thread.
//!
//! Releasing the player waits for written audio to play out, unless the queue
//! was cleared or the stream failed.

use super::{
    AudioBackend, AudioObject, BufferQueue, DeviceError, DeviceResult, PlayInterface, PlayState,
    PlayerFormat, QueueCallback, QueueEvent,
};
use crate::buffer::StagingBuffer;
use crate::source::SampleEncoding;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// cpal-backed audio backend.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    /// Output device name (None = default device)
    device_name: Option<String>,
}

impl CpalBackend {
    /// Use the named output device instead of the host default
    pub fn with_device(device_name: impl Into<String>) -> Self {
        Self {
            device_name: Some(device_name.into()),
        }
    }

    /// List available audio output devices on the default host.
    pub fn list_devices() -> DeviceResult<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| DeviceError::new(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

/// Host handle
pub struct CpalEngine {
    host_id: cpal::HostId,
    realized: bool,
}

impl AudioObject for CpalEngine {
    fn realize(&mut self) -> DeviceResult<()> {
        let host = cpal::host_from_id(self.host_id)
            .map_err(|e| DeviceError::new(format!("Audio host unavailable: {}", e)))?;
        let count = host
            .output_devices()
            .map_err(|e| DeviceError::new(format!("Failed to enumerate devices: {}", e)))?
            .count();
        debug!(
            "Audio host {} realized with {} output devices",
            self.host_id.name(),
            count
        );
        self.realized = true;
        Ok(())
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        debug!("Audio host {} released", self.host_id.name());
    }
}

/// Live host, used to create the output mix and the player
pub struct CpalEngineInterface {
    host: cpal::Host,
}

/// Output device
pub struct CpalOutputMix {
    device: cpal::Device,
    name: String,
    realized: bool,
}

impl AudioObject for CpalOutputMix {
    fn realize(&mut self) -> DeviceResult<()> {
        let config = self.device.default_output_config().map_err(|e| {
            DeviceError::new(format!(
                "Failed to get default config for '{}': {}",
                self.name, e
            ))
        })?;
        debug!(
            "Output device '{}' realized: default {} Hz, {} ch, {:?}",
            self.name,
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );
        self.realized = true;
        Ok(())
    }
}

impl Drop for CpalOutputMix {
    fn drop(&mut self) {
        debug!("Output device '{}' released", self.name);
    }
}

/// How PCM bytes map onto the device sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteLayout {
    /// Copy bytes as they are
    Native,
    /// Packed 3-byte samples into 4-byte I32, low byte zero
    Widen24,
}

impl ByteLayout {
    /// Copy whole samples from `src` to `dst`. Returns (bytes consumed, bytes produced).
    fn copy(self, src: &[u8], dst: &mut [u8]) -> (usize, usize) {
        match self {
            Self::Native => {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                (n, n)
            }
            Self::Widen24 => {
                let samples = (src.len() / 3).min(dst.len() / 4);
                for (packed, wide) in src
                    .chunks_exact(3)
                    .zip(dst.chunks_exact_mut(4))
                    .take(samples)
                {
                    wide[0] = 0;
                    wide[1..].copy_from_slice(packed);
                }
                (samples * 3, samples * 4)
            }
        }
    }
}

/// Device sample format for a player format
fn stream_format(format: &PlayerFormat) -> DeviceResult<(SampleFormat, ByteLayout)> {
    match (format.encoding, format.bits_per_sample) {
        (SampleEncoding::Int, 8) => Ok((SampleFormat::U8, ByteLayout::Native)),
        (SampleEncoding::Int, 16) => Ok((SampleFormat::I16, ByteLayout::Native)),
        (SampleEncoding::Int, 24) => Ok((SampleFormat::I32, ByteLayout::Widen24)),
        (SampleEncoding::Int, 32) => Ok((SampleFormat::I32, ByteLayout::Native)),
        (SampleEncoding::Float, 32) => Ok((SampleFormat::F32, ByteLayout::Native)),
        (encoding, bits) => Err(DeviceError::new(format!(
            "Unsupported PCM format: {} bit {:?}",
            bits, encoding
        ))),
    }
}

/// Upper bound on waiting for queued audio to play out at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// State shared by the audio callback, the error callback and the control side
#[derive(Default)]
struct StreamShared {
    /// Set by `clear`; the renderer discards its buffers at the next period
    flush: AtomicBool,
    /// Set by `clear`; shutdown then skips draining
    halted: AtomicBool,
    /// Set by the first stream error
    failed: AtomicBool,
    /// Consecutive periods rendered without any PCM
    idle_periods: AtomicU64,
    /// Last reported callback-to-playback latency
    latency_us: AtomicU64,
}

/// Audio-thread side of the buffer queue.
struct Renderer {
    submitted: Receiver<StagingBuffer>,
    events: Sender<QueueEvent>,
    shared: Arc<StreamShared>,
    layout: ByteLayout,
    silence: u8,
    current: Option<StagingBuffer>,
    cursor: usize,
    /// Fully written in the previous period, returned at the next one
    finished: Vec<StagingBuffer>,
}

impl Renderer {
    fn new(
        submitted: Receiver<StagingBuffer>,
        events: Sender<QueueEvent>,
        shared: Arc<StreamShared>,
        sample_format: SampleFormat,
        layout: ByteLayout,
        depth: usize,
    ) -> Self {
        Self {
            submitted,
            events,
            shared,
            layout,
            silence: if sample_format == SampleFormat::U8 { 0x80 } else { 0 },
            current: None,
            cursor: 0,
            finished: Vec::with_capacity(depth),
        }
    }

    /// Fill one device period.
    ///
    /// Runs on the audio thread and never waits on the session or the file.
    /// A buffer goes back to the refill thread one period after its last bytes
    /// were written, once the device has taken that period. Buffers discarded
    /// by a flush are freed here.
    fn render(&mut self, out: &mut [u8], latency: Option<Duration>) {
        if let Some(latency) = latency {
            self.shared
                .latency_us
                .store(latency.as_micros() as u64, Ordering::Relaxed);
        }

        if self.shared.flush.swap(false, Ordering::AcqRel) {
            self.current = None;
            self.cursor = 0;
            self.finished.clear();
        }
        for done in self.finished.drain(..) {
            let _ = self.events.try_send(QueueEvent::Consumed(done));
        }

        let mut written = 0;
        while written < out.len() {
            if self.current.is_none() {
                match self.submitted.try_recv() {
                    Ok(buffer) => {
                        self.current = Some(buffer);
                        self.cursor = 0;
                    }
                    Err(_) => break,
                }
            }
            let Some(buffer) = self.current.as_ref() else {
                break;
            };

            let (consumed, produced) = self
                .layout
                .copy(&buffer.filled()[self.cursor..], &mut out[written..]);
            self.cursor += consumed;
            written += produced;

            // A remainder too short for one sample counts as written.
            let done = self.cursor >= buffer.len() || (produced == 0 && written < out.len());
            if done {
                if let Some(done) = self.current.take() {
                    self.finished.push(done);
                }
                self.cursor = 0;
            }
        }

        if written == 0 {
            self.shared.idle_periods.fetch_add(1, Ordering::AcqRel);
        } else {
            self.shared.idle_periods.store(0, Ordering::Release);
        }
        out[written..].fill(self.silence);
    }
}

/// Forward the first stream error to the refill thread as a queue failure
fn report_failure(shared: &StreamShared, events: &Sender<QueueEvent>, err: &dyn fmt::Display) {
    error!("Audio stream error: {}", err);
    if !shared.failed.swap(true, Ordering::AcqRel) {
        let failure = DeviceError::new(format!("Audio stream error: {}", err));
        let _ = events.try_send(QueueEvent::Failed(failure));
    }
}

/// Block until audio already written to the device has played out: at least
/// two silent periods rendered and the reported output latency elapsed.
fn wait_for_drain(shared: &StreamShared) {
    let started = Instant::now();
    let latency = Duration::from_micros(shared.latency_us.load(Ordering::Relaxed));

    loop {
        let idle = shared.idle_periods.load(Ordering::Acquire) >= 2;
        if idle && started.elapsed() >= latency {
            debug!("Output drained after {:?}", started.elapsed());
            return;
        }
        if started.elapsed() >= DRAIN_TIMEOUT {
            warn!("Timed out draining output stream");
            return;
        }
        thread::sleep(DRAIN_POLL);
    }
}

enum StreamCommand {
    SetState(PlayState, Sender<DeviceResult<()>>),
    Shutdown { drain: bool },
}

/// Resources of a realized player
struct RunningStream {
    commands: Sender<StreamCommand>,
    thread: JoinHandle<()>,
    submit: Sender<StagingBuffer>,
    submitted: Receiver<StagingBuffer>,
    events: Receiver<QueueEvent>,
    shared: Arc<StreamShared>,
}

/// Buffer-queue player
pub struct CpalPlayer {
    device: cpal::Device,
    device_name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
    layout: ByteLayout,
    depth: usize,
    running: Option<RunningStream>,
}

impl AudioObject for CpalPlayer {
    fn realize(&mut self) -> DeviceResult<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let (submit, submitted) = bounded::<StagingBuffer>(self.depth);
        // Room for every queued buffer plus one failure notice.
        let (events_tx, events) = bounded::<QueueEvent>(self.depth + 1);
        let shared = Arc::new(StreamShared::default());
        let renderer = Renderer::new(
            submitted.clone(),
            events_tx.clone(),
            Arc::clone(&shared),
            self.sample_format,
            self.layout,
            self.depth,
        );

        let (commands, command_rx) = unbounded::<StreamCommand>();
        let (ready_tx, ready_rx) = bounded::<DeviceResult<()>>(1);
        let stream = OutputStream {
            device: self.device.clone(),
            config: self.config.clone(),
            sample_format: self.sample_format,
            renderer,
            failures: events_tx,
            shared: Arc::clone(&shared),
        };

        let thread = thread::Builder::new()
            .name("waveplayer-output".to_string())
            .spawn(move || run_stream(stream, ready_tx, command_rx))
            .map_err(|e| DeviceError::new(format!("Failed to spawn output thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::new("Output thread exited during setup")));
        if let Err(e) = ready {
            if thread.join().is_err() {
                error!("Output thread panicked during setup");
            }
            return Err(e);
        }

        info!(
            "Output stream ready on '{}': {} Hz, {} ch, {:?}",
            self.device_name, self.config.sample_rate.0, self.config.channels, self.sample_format
        );

        self.running = Some(RunningStream {
            commands,
            thread,
            submit,
            submitted,
            events,
            shared,
        });
        Ok(())
    }
}

impl Drop for CpalPlayer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let drain = !running.shared.halted.load(Ordering::Acquire)
                && !running.shared.failed.load(Ordering::Acquire);
            let _ = running.commands.send(StreamCommand::Shutdown { drain });
            if running.thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
        debug!("Player on '{}' released", self.device_name);
    }
}

/// Everything the `waveplayer-output` thread needs to build the stream
struct OutputStream {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    renderer: Renderer,
    failures: Sender<QueueEvent>,
    shared: Arc<StreamShared>,
}

/// Body of the `waveplayer-output` thread
fn run_stream(
    output: OutputStream,
    ready: Sender<DeviceResult<()>>,
    commands: Receiver<StreamCommand>,
) {
    let OutputStream {
        device,
        config,
        sample_format,
        mut renderer,
        failures,
        shared,
    } = output;

    let error_shared = Arc::clone(&shared);
    let stream = device.build_output_stream_raw(
        &config,
        sample_format,
        move |data: &mut cpal::Data, info: &cpal::OutputCallbackInfo| {
            let timestamp = info.timestamp();
            let latency = timestamp.playback.duration_since(&timestamp.callback);
            renderer.render(data.bytes_mut(), latency);
        },
        move |err| report_failure(&error_shared, &failures, &err),
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(DeviceError::new(format!(
                "Failed to build stream: {}",
                e
            ))));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut playing = false;
    for command in commands.iter() {
        match command {
            StreamCommand::SetState(state, reply) => {
                let result = match state {
                    PlayState::Playing => stream
                        .play()
                        .map_err(|e| DeviceError::new(format!("Failed to start stream: {}", e))),
                    PlayState::Stopped => stream
                        .pause()
                        .map_err(|e| DeviceError::new(format!("Failed to pause stream: {}", e))),
                };
                if result.is_ok() {
                    playing = state == PlayState::Playing;
                }
                let _ = reply.send(result);
            }
            StreamCommand::Shutdown { drain } => {
                // A paused stream renders nothing, so there is nothing to wait for.
                if drain && playing {
                    wait_for_drain(&shared);
                }
                break;
            }
        }
    }

    drop(stream);
    debug!("Output stream closed");
}

/// Buffer-queue interface of a [`CpalPlayer`]
pub struct CpalBufferQueue {
    submit: Sender<StagingBuffer>,
    submitted: Receiver<StagingBuffer>,
    events: Receiver<QueueEvent>,
    shared: Arc<StreamShared>,
    callback_registered: bool,
}

impl BufferQueue for CpalBufferQueue {
    fn register_callback(&mut self, mut callback: QueueCallback) -> DeviceResult<()> {
        if self.callback_registered {
            return Err(DeviceError::new("Refill callback already registered"));
        }

        let events = self.events.clone();
        // Detached: exits once the stream drops the sending side.
        thread::Builder::new()
            .name("waveplayer-refill".to_string())
            .spawn(move || {
                for event in events.iter() {
                    callback(event);
                }
                debug!("Refill dispatcher stopped");
            })
            .map_err(|e| DeviceError::new(format!("Failed to spawn refill thread: {}", e)))?;

        self.callback_registered = true;
        Ok(())
    }

    fn enqueue(&mut self, buffer: StagingBuffer) -> DeviceResult<()> {
        self.submit.try_send(buffer).map_err(|e| match e {
            TrySendError::Full(_) => DeviceError::new("Buffer queue full"),
            TrySendError::Disconnected(_) => DeviceError::new("Output stream closed"),
        })
    }

    fn clear(&mut self) -> DeviceResult<()> {
        while self.submitted.try_recv().is_ok() {}
        self.shared.halted.store(true, Ordering::Release);
        self.shared.flush.store(true, Ordering::Release);
        Ok(())
    }
}

/// Play-state interface of a [`CpalPlayer`]
pub struct CpalPlayInterface {
    commands: Sender<StreamCommand>,
}

impl PlayInterface for CpalPlayInterface {
    fn set_play_state(&mut self, state: PlayState) -> DeviceResult<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(StreamCommand::SetState(state, reply_tx))
            .map_err(|_| DeviceError::new("Output thread not running"))?;
        reply_rx
            .recv()
            .unwrap_or_else(|_| Err(DeviceError::new("Output thread exited")))
    }
}

impl AudioBackend for CpalBackend {
    type Engine = CpalEngine;
    type EngineInterface = CpalEngineInterface;
    type OutputMix = CpalOutputMix;
    type Player = CpalPlayer;
    type Queue = CpalBufferQueue;
    type Play = CpalPlayInterface;

    fn create_engine(&self) -> DeviceResult<CpalEngine> {
        let host = cpal::default_host();
        debug!("Using audio host {}", host.id().name());
        Ok(CpalEngine {
            host_id: host.id(),
            realized: false,
        })
    }

    fn engine_interface(&self, engine: &CpalEngine) -> DeviceResult<CpalEngineInterface> {
        if !engine.realized {
            return Err(DeviceError::new("Engine not realized"));
        }
        let host = cpal::host_from_id(engine.host_id)
            .map_err(|e| DeviceError::new(format!("Audio host unavailable: {}", e)))?;
        Ok(CpalEngineInterface { host })
    }

    fn create_output_mix(&self, engine: &CpalEngineInterface) -> DeviceResult<CpalOutputMix> {
        let device = match self.device_name.as_ref() {
            Some(name) => engine
                .host
                .output_devices()
                .map_err(|e| DeviceError::new(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().ok().as_ref() == Some(name))
                .ok_or_else(|| DeviceError::new(format!("Output device '{}' not found", name)))?,
            None => engine
                .host
                .default_output_device()
                .ok_or_else(|| DeviceError::new("No default output device found"))?,
        };

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio device: {}", name);
        Ok(CpalOutputMix {
            device,
            name,
            realized: false,
        })
    }

    fn create_player(
        &self,
        _engine: &CpalEngineInterface,
        format: &PlayerFormat,
        output_mix: &CpalOutputMix,
    ) -> DeviceResult<CpalPlayer> {
        if !output_mix.realized {
            return Err(DeviceError::new("Output device not realized"));
        }
        let (sample_format, layout) = stream_format(format)?;
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate_hz()),
            buffer_size: cpal::BufferSize::Default,
        };
        debug!("Creating player: {} → {:?}", format, sample_format);

        Ok(CpalPlayer {
            device: output_mix.device.clone(),
            device_name: output_mix.name.clone(),
            config,
            sample_format,
            layout,
            depth: format.queue_depth.max(1) as usize,
            running: None,
        })
    }

    fn buffer_queue(&self, player: &CpalPlayer) -> DeviceResult<CpalBufferQueue> {
        let running = player
            .running
            .as_ref()
            .ok_or_else(|| DeviceError::new("Player not realized"))?;
        Ok(CpalBufferQueue {
            submit: running.submit.clone(),
            submitted: running.submitted.clone(),
            events: running.events.clone(),
            shared: Arc::clone(&running.shared),
            callback_registered: false,
        })
    }

    fn play_interface(&self, player: &CpalPlayer) -> DeviceResult<CpalPlayInterface> {
        let running = player
            .running
            .as_ref()
            .ok_or_else(|| DeviceError::new("Player not realized"))?;
        Ok(CpalPlayInterface {
            commands: running.commands.clone(),
        })
    }
}
