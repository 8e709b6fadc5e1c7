//! WAV fixture generation
//!
//! 8-bit fixtures are written so the raw data-chunk bytes are known exactly,
//! which lets tests compare what the device received against the file.

use hound::{WavSpec, WavWriter};
use std::path::Path;

/// Telephone-rate mono, 8 bit: one data byte per frame
pub const PCM8_RATE: u32 = 8000;

fn pcm8_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: PCM8_RATE,
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Mono 8-bit silence. Every data byte is 0x80.
pub fn generate_silence_wav<P: AsRef<Path>>(path: P, data_bytes: usize) -> Result<(), hound::Error> {
    let mut writer = WavWriter::create(path, pcm8_spec())?;
    for _ in 0..data_bytes {
        writer.write_sample(0i8)?;
    }
    writer.finalize()
}

/// Mono 8-bit ramp. Returns the raw data-chunk bytes (0, 1, 2, ... wrapping).
pub fn generate_ramp_wav<P: AsRef<Path>>(path: P, data_bytes: usize) -> Result<Vec<u8>, hound::Error> {
    let mut writer = WavWriter::create(path, pcm8_spec())?;
    let mut raw = Vec::with_capacity(data_bytes);
    for i in 0..data_bytes {
        let byte = (i % 256) as u8;
        // 8-bit WAV is unsigned with a 128 offset.
        writer.write_sample((byte as i16 - 128) as i8)?;
        raw.push(byte);
    }
    writer.finalize()?;
    Ok(raw)
}

/// 16-bit silence with the given layout
pub fn generate_pcm16_wav<P: AsRef<Path>>(
    path: P,
    channels: u16,
    sample_rate: u32,
    frames: usize,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for _ in 0..frames * channels as usize {
        writer.write_sample(0i16)?;
    }
    writer.finalize()
}
