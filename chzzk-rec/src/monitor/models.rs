//! Chzzk API payloads and the decoded live status.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Envelope of every Chzzk API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    pub message: Option<String>,
    pub content: Option<T>,
}

/// `content` of the live-detail endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDetail {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub live_id: Option<u64>,
    #[serde(default)]
    pub live_title: Option<String>,
    #[serde(default)]
    pub live_category: Option<String>,
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub channel: Option<ChannelSummary>,
    /// JSON document encoded as a string; null when playback is unavailable.
    #[serde(default)]
    pub live_playback_json: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    #[serde(default)]
    pub channel_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LivePlayback {
    #[serde(default)]
    media: Vec<Media>,
}

/// One playback entry of `livePlaybackJson`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub media_id: String,
    pub protocol: String,
    pub path: String,
}

impl Media {
    pub fn is_hls(&self) -> bool {
        self.media_id == "HLS" && self.protocol == "HLS"
    }
}

pub const STATUS_OPEN: &str = "OPEN";
pub const STATUS_CLOSE: &str = "CLOSE";
pub const STATUS_BLOCK: &str = "BLOCK";

impl LiveDetail {
    /// Decode `livePlaybackJson`. `None` when the API withheld playback.
    pub fn playback_media(&self) -> Result<Option<Vec<Media>>> {
        let Some(raw) = self.live_playback_json.as_deref() else {
            return Ok(None);
        };
        if raw.trim().is_empty() || raw.trim() == "null" {
            return Ok(None);
        }
        let playback: LivePlayback = serde_json::from_str(raw)
            .map_err(|e| Error::transient(format!("malformed livePlaybackJson: {e}")))?;
        Ok(Some(playback.media))
    }
}

/// Metadata of a live broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveInfo {
    pub live_id: Option<u64>,
    pub title: String,
    pub category: Option<String>,
    pub channel_name: Option<String>,
    pub adult: bool,
    /// Playback entries, `None` when withheld (age restriction, missing login).
    pub media: Option<Vec<Media>>,
}

impl LiveInfo {
    /// First HLS playback entry, if any.
    pub fn hls_media(&self) -> Option<&Media> {
        self.media.as_ref()?.iter().find(|m| m.is_hls())
    }
}

/// Result of one live-status poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LiveStatus {
    Live(LiveInfo),
    Offline,
    /// The platform blocked the broadcast; treated like offline.
    Blocked,
}

impl LiveStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LiveStatus::Live(_))
    }

    /// Interpret a live-detail payload. `None` content means offline.
    pub fn from_detail(detail: Option<LiveDetail>) -> Result<Self> {
        let Some(detail) = detail else {
            return Ok(LiveStatus::Offline);
        };

        match detail.status.as_str() {
            STATUS_OPEN => {
                let media = detail.playback_media()?;
                Ok(LiveStatus::Live(LiveInfo {
                    live_id: detail.live_id,
                    title: detail.live_title.unwrap_or_default(),
                    category: detail.live_category,
                    channel_name: detail.channel.and_then(|c| c.channel_name),
                    adult: detail.adult,
                    media,
                }))
            }
            STATUS_BLOCK => Ok(LiveStatus::Blocked),
            _ => Ok(LiveStatus::Offline),
        }
    }
}
