//! Configuration resolution tests
//!
//! Covers the priority order (CLI → environment → TOML → defaults) and the
//! handling of missing or invalid config files.
//!
//! Note: Uses serial_test to prevent environment variable race conditions.
//! Every test that reads or writes WAVEPLAYER_* variables is marked #[serial].

use serial_test::serial;
use std::env;
use std::fs;
use waveplayer_common::config::{
    resolve, Overrides, SizingMode, DEFAULT_BUFFER_MS, DEFAULT_LOG_LEVEL, ENV_BUFFER_BYTES,
    ENV_BUFFER_MS, ENV_BUFFER_SIZING, ENV_CONFIG, ENV_LOG,
};
use waveplayer_common::Error;

fn clear_env() {
    for name in [
        ENV_CONFIG,
        ENV_BUFFER_SIZING,
        ENV_BUFFER_MS,
        ENV_BUFFER_BYTES,
        ENV_LOG,
    ] {
        env::remove_var(name);
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
#[serial]
fn test_defaults_without_any_source() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");

    let resolved = resolve(&Overrides {
        config_path: Some(path),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(resolved.playback.buffer_sizing, SizingMode::Legacy);
    assert_eq!(resolved.playback.buffer_ms, DEFAULT_BUFFER_MS);
    assert_eq!(resolved.playback.buffer_bytes, None);
    assert_eq!(resolved.log_level, DEFAULT_LOG_LEVEL);
}

#[test]
#[serial]
fn test_toml_values_applied() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [playback]
        buffer_sizing = "duration"
        buffer_ms = 250

        [logging]
        level = "debug"
        "#,
    );

    let resolved = resolve(&Overrides {
        config_path: Some(path.clone()),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(resolved.playback.buffer_sizing, SizingMode::Duration);
    assert_eq!(resolved.playback.buffer_ms, 250);
    assert_eq!(resolved.log_level, "debug");
    assert_eq!(resolved.config_file, Some(path));
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [playback]
        buffer_sizing = "duration"
        buffer_ms = 250
        "#,
    );

    env::set_var(ENV_BUFFER_MS, "750");
    env::set_var(ENV_LOG, "warn");

    let resolved = resolve(&Overrides {
        config_path: Some(path),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(resolved.playback.buffer_sizing, SizingMode::Duration);
    assert_eq!(resolved.playback.buffer_ms, 750);
    assert_eq!(resolved.log_level, "warn");

    clear_env();
}

#[test]
#[serial]
fn test_cli_overrides_env_and_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [playback]
        buffer_sizing = "duration"
        "#,
    );

    env::set_var(ENV_BUFFER_SIZING, "legacy");

    let resolved = resolve(&Overrides {
        config_path: Some(path),
        buffer_sizing: Some(SizingMode::Fixed),
        buffer_bytes: Some(4096),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(resolved.playback.buffer_sizing, SizingMode::Fixed);
    assert_eq!(resolved.playback.buffer_bytes, Some(4096));

    clear_env();
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [logging]
        level = "trace"
        "#,
    );
    env::set_var(ENV_CONFIG, &path);

    let resolved = resolve(&Overrides::default()).unwrap();
    assert_eq!(resolved.log_level, "trace");
    assert_eq!(resolved.config_file, Some(path));

    clear_env();
}

#[test]
#[serial]
fn test_missing_explicit_config_is_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();

    let result = resolve(&Overrides {
        config_path: Some(dir.path().join("does-not-exist.toml")),
        ..Default::default()
    });

    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_malformed_toml_is_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[playback\nbuffer_ms = ");

    let result = resolve(&Overrides {
        config_path: Some(path),
        ..Default::default()
    });

    assert!(matches!(result, Err(Error::Toml(_))));
}

#[test]
#[serial]
fn test_invalid_env_value_is_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "");
    env::set_var(ENV_BUFFER_MS, "soon");

    let result = resolve(&Overrides {
        config_path: Some(path),
        ..Default::default()
    });

    assert!(matches!(result, Err(Error::Config(_))));
    clear_env();
}

#[test]
#[serial]
fn test_fixed_mode_without_bytes_is_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [playback]
        buffer_sizing = "fixed"
        "#,
    );

    let result = resolve(&Overrides {
        config_path: Some(path),
        ..Default::default()
    });

    assert!(matches!(result, Err(Error::Config(_))));
}
