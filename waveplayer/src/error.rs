//! Error types for waveplayer
//!
//! Every bootstrap failure surfaces as exactly one of these, at the point of
//! first failure. End-of-stream is not an error.

use crate::session::BootstrapStep;
use thiserror::Error;

/// Main error type for the waveplayer library
#[derive(Error, Debug)]
pub enum Error {
    /// Bad path, unreadable file, or unsupported WAV
    #[error("Failed to open WAV source: {0}")]
    SourceOpen(String),

    /// Audio object creation, realization or interface lookup failed
    #[error("Audio device initialization failed ({step}): {reason}")]
    DeviceInit { step: BootstrapStep, reason: String },

    /// Staging buffer could not be reserved
    #[error("Failed to allocate {requested} byte staging buffer")]
    Allocation { requested: usize },

    /// Buffer sizing produced an unusable capacity
    #[error("Invalid staging buffer size: {0}")]
    InvalidSizing(String),

    /// Session-level failures after bootstrap
    #[error("Playback error: {0}")]
    Playback(String),
}

impl Error {
    /// Bootstrap step at which the session failed, if this is a setup error
    pub fn step(&self) -> Option<BootstrapStep> {
        match self {
            Self::SourceOpen(_) => Some(BootstrapStep::OpenSource),
            Self::DeviceInit { step, .. } => Some(*step),
            Self::Allocation { .. } | Self::InvalidSizing(_) => Some(BootstrapStep::AllocateBuffer),
            Self::Playback(_) => None,
        }
    }
}

/// Convenience Result type using the waveplayer Error
pub type Result<T> = std::result::Result<T, Error>;
