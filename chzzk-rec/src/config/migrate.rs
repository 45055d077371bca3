//! Migration from the legacy one-file-per-setting layout.
//!
//! Older installs kept `channels.json`, `delays.json`, `cookie.json` and a
//! handful of text files next to each other. When `config.json` is missing
//! they are merged into it and renamed to `*.bak`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use super::store::{ConfigStore, decode_config};
use super::types::Config;
use crate::Result;
use crate::utils::fs::io_error;

/// Legacy files, in the order they are merged.
pub const LEGACY_FILES: &[&str] = &[
    "channels.json",
    "delays.json",
    "cookie.json",
    "thread.txt",
    "time_sleep.txt",
    "log_enabled.txt",
    "channel_count.txt",
];

fn legacy_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Whether any legacy file exists next to `config_path`.
pub fn has_legacy_files(config_path: &Path) -> bool {
    let dir = legacy_dir(config_path);
    LEGACY_FILES.iter().any(|name| dir.join(name).exists())
}

/// Merge legacy files into `config_path`.
///
/// Returns `Ok(false)` when there was nothing to migrate.
pub fn migrate_legacy(config_path: &Path) -> Result<bool> {
    if !has_legacy_files(config_path) {
        return Ok(false);
    }

    let dir = legacy_dir(config_path);
    info!(dir = %dir.display(), "Migrating legacy configuration files to {}", config_path.display());

    let config = read_legacy(&dir);
    ConfigStore::new(config_path).save(&config)?;

    for name in LEGACY_FILES {
        let path = dir.join(name);
        if !path.exists() {
            continue;
        }
        let backup = dir.join(format!("{name}.bak"));
        std::fs::rename(&path, &backup).map_err(|e| io_error("backing up legacy file", &path, e))?;
    }

    info!("Legacy configuration migrated, old files renamed to *.bak");
    Ok(true)
}

fn read_legacy(dir: &Path) -> Config {
    let mut root = serde_json::Map::new();
    root.insert(
        "channels".into(),
        read_json(&dir.join("channels.json")).unwrap_or(Value::Array(Vec::new())),
    );
    if let Some(delays) = read_json(&dir.join("delays.json")) {
        root.insert("delays".into(), delays);
    }
    if let Some(cookies) = read_json(&dir.join("cookie.json")) {
        root.insert("cookies".into(), cookies);
    }

    let mut settings = serde_json::Map::new();
    if let Some(threads) = read_number(&dir.join("thread.txt")) {
        settings.insert("threads".into(), threads.into());
    }
    if let Some(interval) = read_number(&dir.join("time_sleep.txt")) {
        settings.insert("rescan_interval".into(), interval.into());
    }
    if let Some(enabled) = read_text(&dir.join("log_enabled.txt")) {
        settings.insert(
            "logging_enabled".into(),
            Value::Bool(enabled.eq_ignore_ascii_case("true")),
        );
    }
    root.insert("recorder_settings".into(), Value::Object(settings));

    decode_config(&Value::Object(root))
}

fn read_text(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read legacy file");
            None
        }
    }
}

fn read_number(path: &Path) -> Option<u64> {
    let text = read_text(path)?;
    match text.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(path = %path.display(), value = %text, "Ignoring non-numeric legacy value");
            None
        }
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let text = read_text(path)?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed legacy file");
            None
        }
    }
}
