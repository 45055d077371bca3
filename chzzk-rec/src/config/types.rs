//! Configuration data model.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default output directory for recordings.
pub const DEFAULT_OUTPUT_DIR: &str = "./recordings";

/// One monitored channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Platform channel id used for API calls.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Stable key of the channel in the task set and `delays` map.
    #[serde(default)]
    pub identifier: String,
    #[serde(
        default = "default_active",
        deserialize_with = "deserialize_active",
        serialize_with = "serialize_active"
    )]
    pub active: bool,
    /// Start delay in seconds; overrides `delays[identifier]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl Channel {
    /// Fill in derived fields after decoding.
    pub(crate) fn normalized(mut self) -> Self {
        if self.identifier.trim().is_empty() {
            self.identifier = self.id.clone();
        }
        if self.name.trim().is_empty() {
            self.name = self.identifier.clone();
        }
        self
    }

    /// Display label used in logs and the dashboard.
    pub fn label(&self) -> &str {
        &self.name
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActiveFlag {
    Bool(bool),
    Text(String),
}

fn deserialize_active<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match ActiveFlag::deserialize(deserializer)? {
        ActiveFlag::Bool(b) => Ok(b),
        ActiveFlag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(true),
            "off" | "false" | "no" | "0" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid active flag '{other}', expected \"on\" or \"off\""
            ))),
        },
    }
}

fn serialize_active<S>(active: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(if *active { "on" } else { "off" })
}

/// Naver session cookies. Both may be empty (unauthenticated).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "NID_SES", default)]
    pub nid_ses: String,
    #[serde(rename = "NID_AUT", default)]
    pub nid_aut: String,
}

impl Credentials {
    pub fn new(nid_ses: impl Into<String>, nid_aut: impl Into<String>) -> Self {
        Self {
            nid_ses: nid_ses.into(),
            nid_aut: nid_aut.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nid_ses.trim().is_empty() && self.nid_aut.trim().is_empty()
    }

    /// `Cookie` header value, `None` when unauthenticated.
    pub fn cookie_header(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(format!("NID_AUT={}; NID_SES={}", self.nid_aut, self.nid_ses))
    }
}

/// Global recorder tunables (`recorder_settings`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Segment download threads passed to the fetcher.
    pub threads: u32,
    /// Poll interval in seconds.
    pub rescan_interval: u64,
    pub logging_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streamlink_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_dir: Option<PathBuf>,
    pub quality: String,
    pub stop_grace_secs: u64,
    pub min_output_bytes: u64,
    pub poll_jitter_secs: u64,
    pub max_poll_errors: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub auth_failure_threshold: u32,
    pub token_refresh_lead_secs: u64,
    pub config_reload_secs: u64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            threads: 2,
            rescan_interval: 30,
            logging_enabled: true,
            streamlink_path: None,
            ffmpeg_path: None,
            plugin_dir: None,
            quality: "best".to_string(),
            stop_grace_secs: 10,
            min_output_bytes: 1,
            poll_jitter_secs: 5,
            max_poll_errors: 3,
            backoff_base_secs: 30,
            backoff_max_secs: 480,
            auth_failure_threshold: 3,
            token_refresh_lead_secs: 3 * 60 * 60,
            config_reload_secs: 10,
        }
    }
}

impl RecorderSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn config_reload_interval(&self) -> Duration {
        Duration::from_secs(self.config_reload_secs.max(1))
    }

    /// Fetcher binary: config value, then `STREAMLINK_PATH`, then `streamlink`.
    pub fn streamlink_program(&self) -> PathBuf {
        resolve_program(&self.streamlink_path, "STREAMLINK_PATH", "streamlink")
    }

    /// Encoder binary: config value, then `FFMPEG_PATH`, then `ffmpeg`.
    pub fn ffmpeg_program(&self) -> PathBuf {
        resolve_program(&self.ffmpeg_path, "FFMPEG_PATH", "ffmpeg")
    }
}

fn resolve_program(configured: &Option<PathBuf>, env_var: &str, fallback: &str) -> PathBuf {
    if let Some(path) = configured
        && !path.as_os_str().is_empty()
    {
        return path.clone();
    }
    match std::env::var_os(env_var) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(fallback),
    }
}

/// Fully decoded `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub channels: Vec<Channel>,
    pub delays: HashMap<String, u64>,
    #[serde(rename = "cookies")]
    pub credentials: Credentials,
    #[serde(rename = "recorder_settings")]
    pub settings: RecorderSettings,
}

impl Config {
    /// Channels with `active` set.
    pub fn active_channels(&self) -> Vec<Channel> {
        self.channels.iter().filter(|c| c.active).cloned().collect()
    }

    /// Start delay for a channel: its own `delay`, else `delays[identifier]`, else 0.
    pub fn start_delay(&self, channel: &Channel) -> Duration {
        let secs = channel
            .delay
            .or_else(|| self.delays.get(&channel.identifier).copied())
            .unwrap_or(0);
        Duration::from_secs(secs)
    }
}
