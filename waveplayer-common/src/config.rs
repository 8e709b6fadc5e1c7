//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The TOML file is optional. An explicitly requested file that does not exist
//! is an error; a missing default-location file is not.
//!
//! Resolution runs before the tracing subscriber exists, so nothing here logs.
//! The file actually used is reported in `ResolvedConfig::config_file`.

use crate::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "WAVEPLAYER_CONFIG";
/// Environment variable selecting the staging buffer sizing mode
pub const ENV_BUFFER_SIZING: &str = "WAVEPLAYER_BUFFER_SIZING";
/// Environment variable for the `duration` sizing mode length
pub const ENV_BUFFER_MS: &str = "WAVEPLAYER_BUFFER_MS";
/// Environment variable for the `fixed` sizing mode capacity
pub const ENV_BUFFER_BYTES: &str = "WAVEPLAYER_BUFFER_BYTES";
/// Environment variable for the log level
pub const ENV_LOG: &str = "WAVEPLAYER_LOG";

/// Default staging duration for the `duration` sizing mode
pub const DEFAULT_BUFFER_MS: u32 = 500;
/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How the staging buffer capacity is derived from the source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// channels × sample rate × bit depth bytes
    #[default]
    Legacy,
    /// Real PCM byte rate × a configured number of milliseconds
    Duration,
    /// Explicit byte count
    Fixed,
}

impl FromStr for SizingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "duration" => Ok(Self::Duration),
            "fixed" => Ok(Self::Fixed),
            other => Err(Error::InvalidInput(format!(
                "unknown buffer sizing mode '{}' (expected legacy, duration or fixed)",
                other
            ))),
        }
    }
}

impl fmt::Display for SizingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Legacy => "legacy",
            Self::Duration => "duration",
            Self::Fixed => "fixed",
        };
        f.write_str(name)
    }
}

/// Configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Staging buffer settings
    #[serde(default)]
    pub playback: PlaybackToml,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[playback]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackToml {
    #[serde(default)]
    pub buffer_sizing: Option<SizingMode>,
    #[serde(default)]
    pub buffer_ms: Option<u32>,
    #[serde(default)]
    pub buffer_bytes: Option<usize>,
}

/// `[logging]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub level: Option<String>,
}

impl TomlConfig {
    /// Parse a config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub buffer_sizing: Option<SizingMode>,
    pub buffer_ms: Option<u32>,
    pub buffer_bytes: Option<usize>,
    pub log_level: Option<String>,
}

/// Resolved staging buffer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub buffer_sizing: SizingMode,
    pub buffer_ms: u32,
    /// Required when `buffer_sizing` is `Fixed`
    pub buffer_bytes: Option<usize>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            buffer_sizing: SizingMode::Legacy,
            buffer_ms: DEFAULT_BUFFER_MS,
            buffer_bytes: None,
        }
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub playback: PlaybackSettings,
    pub log_level: String,
    /// Config file that contributed values, if any
    pub config_file: Option<PathBuf>,
}

/// Resolve configuration from overrides, environment, config file and defaults.
pub fn resolve(overrides: &Overrides) -> Result<ResolvedConfig> {
    let config_file = locate_config_file(overrides.config_path.clone())?;
    let toml_config = match &config_file {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::default(),
    };

    let defaults = PlaybackSettings::default();

    let buffer_sizing = layered(
        overrides.buffer_sizing,
        ENV_BUFFER_SIZING,
        toml_config.playback.buffer_sizing,
    )?
    .unwrap_or(defaults.buffer_sizing);

    let buffer_ms = layered(overrides.buffer_ms, ENV_BUFFER_MS, toml_config.playback.buffer_ms)?
        .unwrap_or(defaults.buffer_ms);

    let buffer_bytes = layered(
        overrides.buffer_bytes,
        ENV_BUFFER_BYTES,
        toml_config.playback.buffer_bytes,
    )?;

    let log_level = layered(
        overrides.log_level.clone(),
        ENV_LOG,
        toml_config.logging.level.clone(),
    )?
    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    let playback = PlaybackSettings {
        buffer_sizing,
        buffer_ms,
        buffer_bytes,
    };
    validate(&playback, &log_level)?;

    Ok(ResolvedConfig {
        playback,
        log_level,
        config_file,
    })
}

fn validate(playback: &PlaybackSettings, log_level: &str) -> Result<()> {
    match playback.buffer_sizing {
        SizingMode::Duration if playback.buffer_ms == 0 => {
            return Err(Error::Config(
                "buffer_ms must be greater than zero for duration sizing".to_string(),
            ));
        }
        SizingMode::Fixed => match playback.buffer_bytes {
            None => {
                return Err(Error::Config(
                    "fixed buffer sizing requires buffer_bytes".to_string(),
                ));
            }
            Some(0) => {
                return Err(Error::Config(
                    "buffer_bytes must be greater than zero".to_string(),
                ));
            }
            Some(_) => {}
        },
        _ => {}
    }

    tracing::Level::from_str(log_level)
        .map_err(|_| Error::Config(format!("invalid log level '{}'", log_level)))?;

    Ok(())
}

/// Pick the config file to read.
///
/// An explicit path (argument, then environment) must exist. Otherwise the
/// platform default location is used when present.
fn locate_config_file(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    let explicit = explicit.or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));

    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    Ok(default_config_file())
}

/// Default configuration file path for the platform, if one exists
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("waveplayer").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/waveplayer/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Command line wins, then the environment, then the config file.
fn layered<T: FromStr>(cli: Option<T>, env_name: &str, file: Option<T>) -> Result<Option<T>> {
    if cli.is_some() {
        return Ok(cli);
    }
    Ok(env_value(env_name)?.or(file))
}

/// Read and parse an environment variable. Unset or empty means `None`.
fn env_value<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}
