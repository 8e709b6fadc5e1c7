//! # waveplayer common library
//!
//! Shared code for the waveplayer workspace:
//! - Common error type
//! - Configuration loading (CLI → environment → TOML → defaults)
//! - Logging bootstrap

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ResolvedConfig, SizingMode};
pub use error::{Error, Result};
