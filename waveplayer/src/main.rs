//! waveplayer - Main entry point
//!
//! Plays one WAV file on an audio output device and exits when it finishes.
//! Ctrl+C stops playback early and still releases the device cleanly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use waveplayer::backend::CpalBackend;
use waveplayer::inspect;
use waveplayer::{BufferSizing, PlaybackOptions, SessionEnd};
use waveplayer_common::config::{self, Overrides, SizingMode, ENV_CONFIG, ENV_LOG};
use waveplayer_common::logging;

/// Command-line arguments for waveplayer
#[derive(Parser, Debug)]
#[command(name = "waveplayer")]
#[command(about = "Stream a WAV file to an audio output device")]
#[command(version, long_version = long_version())]
struct Args {
    /// WAV file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Staging buffer sizing: legacy, duration or fixed
    #[arg(short, long)]
    buffer_sizing: Option<SizingMode>,

    /// Buffer duration in milliseconds for `duration` sizing
    #[arg(long)]
    buffer_ms: Option<u32>,

    /// Buffer size in bytes for `fixed` sizing
    #[arg(long)]
    buffer_bytes: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = ENV_LOG)]
    log_level: Option<String>,

    /// Output device name (default device if omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Print the WAV format and exit without playing
    #[arg(long)]
    info: bool,

    /// With --info, print JSON instead of text
    #[arg(long, requires = "info")]
    json: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_HASH"),
        ", built ",
        env!("BUILD_TIMESTAMP"),
        ")"
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let resolved = config::resolve(&Overrides {
        config_path: args.config.clone(),
        buffer_sizing: args.buffer_sizing,
        buffer_ms: args.buffer_ms,
        buffer_bytes: args.buffer_bytes,
        log_level: args.log_level.clone(),
    })
    .context("Failed to resolve configuration")?;

    // Initialize tracing
    logging::init_tracing(&resolved.log_level);

    info!(
        "Starting waveplayer {} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );
    if let Some(path) = &resolved.config_file {
        info!("Config file: {}", path.display());
    }

    if args.list_devices {
        for name in CpalBackend::list_devices().context("Failed to list output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let file = args.file.context("No WAV file given")?;
    let sizing =
        BufferSizing::from_settings(&resolved.playback).context("Invalid buffer sizing")?;

    if args.info {
        let details = inspect::describe(&file, sizing)
            .with_context(|| format!("Failed to inspect {}", file.display()))?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&details)?);
        } else {
            println!("{}", details);
        }
        return Ok(());
    }

    let backend = match args.device {
        Some(name) => CpalBackend::with_device(name),
        None => CpalBackend::default(),
    };
    let options = PlaybackOptions {
        buffer_sizing: sizing,
    };

    info!("Playing {} ({})", file.display(), sizing);
    let mut handle = waveplayer::play_with(&file, &backend, options)
        .with_context(|| format!("Failed to start playback of {}", file.display()))?;

    let outcome = tokio::select! {
        report = handle.wait() => report,
        _ = shutdown_signal() => {
            handle.stop();
            handle.wait().await
        }
    };
    let report = outcome.context("Playback did not finish cleanly")?;

    match report.end {
        SessionEnd::Completed | SessionEnd::Stopped => {
            info!(
                "Finished ({:?}): {} bytes in {} buffers",
                report.end, report.stats.bytes_submitted, report.stats.enqueues
            );
            Ok(())
        }
        SessionEnd::ReadFailed => {
            warn!("Playback ended early: source read failed");
            Ok(())
        }
        SessionEnd::DeviceFailed => anyhow::bail!("Audio device failed during playback"),
    }
}

/// Wait for Ctrl+C
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, stopping playback");
}
