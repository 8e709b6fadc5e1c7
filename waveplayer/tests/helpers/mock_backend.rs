//! Scriptable audio backend
//!
//! Records every device interaction as an [`Event`], can fail any bootstrap
//! step on request, and only "plays" a buffer when the test calls
//! [`MockState::consume`]. The consumed-buffer callback therefore runs on the
//! test thread, at a point the test chooses.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use waveplayer::backend::{
    AudioBackend, AudioObject, BufferQueue, DeviceError, DeviceResult, PlayInterface, PlayState,
    PlayerFormat, QueueCallback, QueueEvent,
};
use waveplayer::{BootstrapStep, StagingBuffer};

/// Device objects that own a platform resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Engine,
    OutputMix,
    Player,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created(Resource),
    Realized(Resource),
    Released(Resource),
    CallbackRegistered,
    StateSet(PlayState),
    Enqueued(usize),
    Cleared,
}

/// Shared device state, inspected by tests
#[derive(Default)]
pub struct MockState {
    events: Mutex<Vec<Event>>,
    formats: Mutex<Vec<PlayerFormat>>,
    played: Mutex<Vec<u8>>,
    in_flight: Mutex<Option<StagingBuffer>>,
    callback: Mutex<Option<QueueCallback>>,
    queue_alive: AtomicBool,
    fail_at: Mutex<Option<BootstrapStep>>,
    fail_enqueue: Mutex<Option<usize>>,
}

impl MockState {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    fn check(&self, step: BootstrapStep) -> DeviceResult<()> {
        if *self.fail_at.lock() == Some(step) {
            return Err(DeviceError::new(format!("injected failure at {}", step)));
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn formats(&self) -> Vec<PlayerFormat> {
        self.formats.lock().clone()
    }

    /// Every byte the device has played, in order
    pub fn played(&self) -> Vec<u8> {
        self.played.lock().clone()
    }

    pub fn created(&self) -> Vec<Resource> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Created(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<Resource> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Released(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn enqueued(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Enqueued(len) => Some(len),
                _ => None,
            })
            .collect()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Play the in-flight buffer and return it through the callback.
    ///
    /// Returns false when nothing was queued.
    pub fn consume(&self) -> bool {
        let Some(buffer) = self.in_flight.lock().take() else {
            return false;
        };
        self.played.lock().extend_from_slice(buffer.filled());

        self.notify(QueueEvent::Consumed(buffer));
        true
    }

    /// Report a stream failure through the callback, as a lost device would.
    ///
    /// Returns false when no callback is registered.
    pub fn fail_stream(&self, message: &str) -> bool {
        self.notify(QueueEvent::Failed(DeviceError::new(message)))
    }

    fn notify(&self, event: QueueEvent) -> bool {
        let Some(mut callback) = self.callback.lock().take() else {
            return false;
        };
        callback(event);
        if self.queue_alive.load(Ordering::SeqCst) {
            *self.callback.lock() = Some(callback);
        }
        true
    }

    /// Consume until the queue stays empty. Returns the number of buffers played.
    pub fn run_to_completion(&self) -> usize {
        let mut played = 0;
        while self.consume() {
            played += 1;
            assert!(played < 100_000, "playback did not terminate");
        }
        played
    }
}

/// Backend handing out mock objects that share one [`MockState`]
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the device operation belonging to `step`.
    /// `Prime` fails the first enqueue.
    pub fn failing_at(self, step: BootstrapStep) -> Self {
        *self.state.fail_at.lock() = Some(step);
        if step == BootstrapStep::Prime {
            *self.state.fail_enqueue.lock() = Some(1);
        }
        self
    }

    /// Fail the `n`th enqueue (1-based)
    pub fn failing_enqueue(self, n: usize) -> Self {
        *self.state.fail_enqueue.lock() = Some(n);
        self
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

pub struct MockEngine {
    state: Arc<MockState>,
    realized: bool,
}

impl AudioObject for MockEngine {
    fn realize(&mut self) -> DeviceResult<()> {
        self.state.check(BootstrapStep::RealizeEngine)?;
        self.realized = true;
        self.state.record(Event::Realized(Resource::Engine));
        Ok(())
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.state.record(Event::Released(Resource::Engine));
    }
}

pub struct MockEngineInterface {
    state: Arc<MockState>,
}

pub struct MockOutputMix {
    state: Arc<MockState>,
    realized: bool,
}

impl AudioObject for MockOutputMix {
    fn realize(&mut self) -> DeviceResult<()> {
        self.state.check(BootstrapStep::RealizeOutputMix)?;
        self.realized = true;
        self.state.record(Event::Realized(Resource::OutputMix));
        Ok(())
    }
}

impl Drop for MockOutputMix {
    fn drop(&mut self) {
        self.state.record(Event::Released(Resource::OutputMix));
    }
}

pub struct MockPlayer {
    state: Arc<MockState>,
    realized: bool,
}

impl AudioObject for MockPlayer {
    fn realize(&mut self) -> DeviceResult<()> {
        self.state.check(BootstrapStep::RealizePlayer)?;
        self.realized = true;
        self.state.record(Event::Realized(Resource::Player));
        Ok(())
    }
}

impl Drop for MockPlayer {
    fn drop(&mut self) {
        // Destroying a player discards whatever it still holds.
        self.state.in_flight.lock().take();
        self.state.record(Event::Released(Resource::Player));
    }
}

pub struct MockQueue {
    state: Arc<MockState>,
    enqueues: usize,
}

impl BufferQueue for MockQueue {
    fn register_callback(&mut self, callback: QueueCallback) -> DeviceResult<()> {
        self.state.check(BootstrapStep::RegisterCallback)?;
        *self.state.callback.lock() = Some(callback);
        self.state.queue_alive.store(true, Ordering::SeqCst);
        self.state.record(Event::CallbackRegistered);
        Ok(())
    }

    fn enqueue(&mut self, buffer: StagingBuffer) -> DeviceResult<()> {
        self.enqueues += 1;
        if *self.state.fail_enqueue.lock() == Some(self.enqueues) {
            return Err(DeviceError::new("injected enqueue failure"));
        }

        let mut in_flight = self.state.in_flight.lock();
        if in_flight.is_some() {
            return Err(DeviceError::new("buffer queue full"));
        }
        let len = buffer.len();
        *in_flight = Some(buffer);
        drop(in_flight);

        self.state.record(Event::Enqueued(len));
        Ok(())
    }

    fn clear(&mut self) -> DeviceResult<()> {
        self.state.in_flight.lock().take();
        self.state.record(Event::Cleared);
        Ok(())
    }
}

impl Drop for MockQueue {
    fn drop(&mut self) {
        self.state.queue_alive.store(false, Ordering::SeqCst);
        // Drops the callback and with it the session slot it captured.
        self.state.callback.lock().take();
    }
}

pub struct MockPlay {
    state: Arc<MockState>,
}

impl PlayInterface for MockPlay {
    fn set_play_state(&mut self, state: PlayState) -> DeviceResult<()> {
        if state == PlayState::Playing {
            self.state.check(BootstrapStep::SetPlaying)?;
        }
        self.state.record(Event::StateSet(state));
        Ok(())
    }
}

impl AudioBackend for MockBackend {
    type Engine = MockEngine;
    type EngineInterface = MockEngineInterface;
    type OutputMix = MockOutputMix;
    type Player = MockPlayer;
    type Queue = MockQueue;
    type Play = MockPlay;

    fn create_engine(&self) -> DeviceResult<MockEngine> {
        self.state.check(BootstrapStep::CreateEngine)?;
        self.state.record(Event::Created(Resource::Engine));
        Ok(MockEngine {
            state: self.state(),
            realized: false,
        })
    }

    fn engine_interface(&self, engine: &MockEngine) -> DeviceResult<MockEngineInterface> {
        assert!(engine.realized, "engine interface requested before realize");
        self.state.check(BootstrapStep::EngineInterface)?;
        Ok(MockEngineInterface {
            state: self.state(),
        })
    }

    fn create_output_mix(&self, engine: &MockEngineInterface) -> DeviceResult<MockOutputMix> {
        engine.state.check(BootstrapStep::CreateOutputMix)?;
        self.state.record(Event::Created(Resource::OutputMix));
        Ok(MockOutputMix {
            state: self.state(),
            realized: false,
        })
    }

    fn create_player(
        &self,
        _engine: &MockEngineInterface,
        format: &PlayerFormat,
        output_mix: &MockOutputMix,
    ) -> DeviceResult<MockPlayer> {
        assert!(output_mix.realized, "player created on unrealized output mix");
        self.state.formats.lock().push(*format);
        self.state.check(BootstrapStep::CreatePlayer)?;
        self.state.record(Event::Created(Resource::Player));
        Ok(MockPlayer {
            state: self.state(),
            realized: false,
        })
    }

    fn buffer_queue(&self, player: &MockPlayer) -> DeviceResult<MockQueue> {
        assert!(player.realized, "buffer queue requested before realize");
        self.state.check(BootstrapStep::BufferQueue)?;
        Ok(MockQueue {
            state: self.state(),
            enqueues: 0,
        })
    }

    fn play_interface(&self, player: &MockPlayer) -> DeviceResult<MockPlay> {
        assert!(player.realized, "play interface requested before realize");
        self.state.check(BootstrapStep::PlayInterface)?;
        Ok(MockPlay {
            state: self.state(),
        })
    }
}
