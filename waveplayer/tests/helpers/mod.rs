//! Test helper modules for waveplayer integration tests
//!
//! - MockBackend: scriptable buffer-queue device with failure injection
//! - wav_generator: deterministic WAV fixtures

#![allow(dead_code)]

pub mod mock_backend;
pub mod wav_generator;

pub use mock_backend::{Event, MockBackend, MockState, Resource};
pub use wav_generator::{generate_pcm16_wav, generate_ramp_wav, generate_silence_wav};
