//! Tolerant reader for `config.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::migrate;
use super::types::{Channel, Config, Credentials, RecorderSettings};
use crate::utils::fs::write_atomic_sync;
use crate::{Error, Result};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Read accessors over the externally owned configuration file.
///
/// Every accessor re-reads the file. A missing or malformed file or section
/// yields defaults and a logged [`Error::Configuration`]; nothing here fails.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the configuration file if it does not exist, migrating legacy
    /// per-setting files when present.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }

        if migrate::migrate_legacy(&self.path)? {
            return Ok(());
        }

        info!(path = %self.path.display(), "Configuration file not found, creating default");
        self.save(&Config::default())
    }

    /// Persist a configuration, used for defaults and migration.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            crate::utils::fs::ensure_dir_all_sync_with_op("creating config directory", parent)?;
        }
        let json = serde_json::to_vec_pretty(config)?;
        write_atomic_sync(&self.path, &json)
    }

    /// Load and decode the whole file. Never creates or rewrites it; a missing
    /// file reads as the default configuration.
    pub fn load(&self) -> Config {
        let value = match self.read_value() {
            Ok(value) => value,
            Err(Error::IoPath { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Configuration file missing, using defaults");
                return Config::default();
            }
            Err(e) => {
                warn!(error = %e, "Using default configuration");
                return Config::default();
            }
        };

        decode_config(&value)
    }

    fn read_value(&self) -> Result<Value> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| Error::io_path("reading configuration", &self.path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            Error::config(format!("{} is not valid JSON: {e}", self.path.display()))
        })
    }

    pub fn load_channels(&self) -> Vec<Channel> {
        self.load().channels
    }

    pub fn load_credentials(&self) -> Credentials {
        self.load().credentials
    }

    pub fn load_poll_interval(&self) -> Duration {
        self.load().settings.poll_interval()
    }

    pub fn load_thread_count(&self) -> u32 {
        self.load().settings.threads
    }

    pub fn load_delays(&self) -> HashMap<String, u64> {
        self.load().delays
    }

    pub fn load_logging_enabled(&self) -> bool {
        self.load().settings.logging_enabled
    }
}

/// Decode every section independently.
pub fn decode_config(value: &Value) -> Config {
    let Some(root) = value.as_object() else {
        warn!("Configuration root is not an object, using defaults");
        return Config::default();
    };

    Config {
        channels: decode_channels(root.get("channels")),
        delays: decode_delays(root.get("delays")),
        credentials: root
            .get("cookies")
            .map(|v| decode_fields::<Credentials>("cookies", v))
            .unwrap_or_default(),
        settings: root
            .get("recorder_settings")
            .map(|v| decode_fields::<RecorderSettings>("recorder_settings", v))
            .unwrap_or_default(),
    }
}

fn decode_channels(value: Option<&Value>) -> Vec<Channel> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        warn!(error = %Error::config("channels must be a list"), "Ignoring channels section");
        return Vec::new();
    };

    let mut channels: Vec<Channel> = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Channel>(entry.clone()) {
            Ok(channel) => {
                let channel = channel.normalized();
                if channels.iter().any(|c| c.identifier == channel.identifier) {
                    warn!(identifier = %channel.identifier, "Duplicate channel entry skipped");
                    continue;
                }
                channels.push(channel);
            }
            Err(e) => warn!(index, error = %e, "Skipping invalid channel entry"),
        }
    }
    channels
}

fn decode_delays(value: Option<&Value>) -> HashMap<String, u64> {
    let Some(value) = value else {
        return HashMap::new();
    };
    let Some(map) = value.as_object() else {
        warn!("delays must be an object, ignoring");
        return HashMap::new();
    };

    map.iter()
        .filter_map(|(key, v)| {
            let secs = v
                .as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()));
            if secs.is_none() {
                warn!(identifier = %key, value = %v, "Ignoring invalid delay");
            }
            secs.map(|s| (key.clone(), s))
        })
        .collect()
}

/// Decode an object field by field, dropping fields that fail to decode so
/// they fall back to their defaults.
fn decode_fields<T>(section: &str, value: &Value) -> T
where
    T: DeserializeOwned + Serialize + Default,
{
    let Some(object) = value.as_object() else {
        warn!(section, "Configuration section is not an object, using defaults");
        return T::default();
    };

    let mut accepted = Map::new();
    for (key, field) in object {
        let mut candidate = accepted.clone();
        candidate.insert(key.clone(), field.clone());
        match serde_json::from_value::<T>(Value::Object(candidate.clone())) {
            Ok(_) => accepted = candidate,
            Err(e) => warn!(section, key = %key, error = %e, "Ignoring invalid configuration value"),
        }
    }

    debug!(section, fields = accepted.len(), "Decoded configuration section");
    serde_json::from_value(Value::Object(accepted)).unwrap_or_default()
}
