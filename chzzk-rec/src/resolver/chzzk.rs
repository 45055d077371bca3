//! Chzzk implementation of [`StreamResolver`].

use async_trait::async_trait;
use m3u8_rs::Playlist;
use tracing::{debug, info};

use super::StreamResolver;
use super::token::StreamHandle;
use crate::config::{Channel, Credentials};
use crate::monitor::{ChzzkClient, LiveStatus};
use crate::{Error, Result};

const LEGACY_CDN_HOST: &str = "livecloud.pstatic.net";
const CDN_HOST: &str = "nlive-streaming.navercdn.com";

/// Point playlist URLs at the CDN host that serves them reliably.
pub fn rewrite_domain(url: &str) -> String {
    url.replace(LEGACY_CDN_HOST, CDN_HOST)
}

/// One variant of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub label: String,
    pub bandwidth: u64,
    pub height: Option<u64>,
    pub uri: String,
}

impl Variant {
    /// Whether a quality name such as `1080p` or `1920x1080` names this variant.
    fn matches(&self, quality: &str) -> bool {
        if self.label.eq_ignore_ascii_case(quality) {
            return true;
        }
        let height = quality.strip_suffix('p').and_then(|h| h.parse::<u64>().ok());
        height.is_some() && height == self.height
    }
}

fn variants(playlist: &[u8]) -> Result<Option<Vec<Variant>>> {
    let parsed = m3u8_rs::parse_playlist_res(playlist)
        .map_err(|e| Error::transient(format!("invalid master playlist: {e}")))?;

    let Playlist::MasterPlaylist(master) = parsed else {
        return Ok(None);
    };

    Ok(Some(
        master
            .variants
            .into_iter()
            .filter(|v| !v.is_i_frame)
            .map(|v| {
                let resolution = v.resolution.as_ref().map(|r| (r.width, r.height));
                Variant {
                    label: resolution
                        .map(|(w, h)| format!("{w}x{h}"))
                        .unwrap_or_else(|| format!("{} kbps", v.bandwidth / 1000)),
                    bandwidth: v.bandwidth,
                    height: resolution.map(|(_, h)| h),
                    uri: v.uri,
                }
            })
            .collect(),
    ))
}

/// Pick the highest-bandwidth variant. `None` for a media playlist.
pub fn best_variant(playlist: &[u8]) -> Result<Option<Variant>> {
    select_variant(playlist, "best")
}

/// Pick the variant named by `quality` (`best`, `worst`, `1080p`, ...),
/// falling back to the best one. `None` for a media playlist.
pub fn select_variant(playlist: &[u8], quality: &str) -> Result<Option<Variant>> {
    let Some(variants) = variants(playlist)? else {
        return Ok(None);
    };

    let bandwidth = |v: &&Variant| v.bandwidth;
    let wanted = quality.trim();
    let chosen = match wanted {
        "worst" => variants.iter().min_by_key(bandwidth),
        "best" | "source" | "" => None,
        name => {
            let found = variants.iter().filter(|v| v.matches(name)).max_by_key(bandwidth);
            if found.is_none() {
                debug!(quality = name, "Requested quality not offered, using best");
            }
            found
        }
    }
    .or_else(|| variants.iter().max_by_key(bandwidth));

    Ok(chosen.cloned())
}

/// Resolves streams through the live-detail API.
#[derive(Debug, Clone)]
pub struct ChzzkResolver {
    client: ChzzkClient,
}

impl ChzzkResolver {
    pub fn new(client: ChzzkClient) -> Self {
        Self { client }
    }

    /// HLS playlist path of a live broadcast, or why there is none.
    async fn playlist_url(&self, channel_id: &str, credentials: &Credentials) -> Result<String> {
        let detail = self.client.live_detail(channel_id, credentials).await?;
        let info = match LiveStatus::from_detail(detail)? {
            LiveStatus::Live(info) => info,
            LiveStatus::Offline | LiveStatus::Blocked => return Err(Error::NotLive),
        };

        if info.media.is_none() {
            if info.adult {
                let reason = if credentials.is_empty() {
                    "age-restricted stream requires login cookies"
                } else {
                    "age-restricted stream rejected the configured cookies"
                };
                return Err(Error::auth(reason));
            }
            return Err(Error::NotLive);
        }

        let Some(media) = info.hls_media() else {
            debug!(channel_id, "No HLS playback entry");
            return Err(Error::NotLive);
        };
        Ok(rewrite_domain(&media.path))
    }
}

#[async_trait]
impl StreamResolver for ChzzkResolver {
    async fn resolve(&self, channel: &Channel, credentials: &Credentials) -> Result<StreamHandle> {
        let url = self.playlist_url(&channel.id, credentials).await?;

        let body = self.client.fetch_text(&url, credentials).await?;
        let mut handle = StreamHandle::new(&channel.id, &url, "source");
        if let Some(variant) = best_variant(body.as_bytes())? {
            handle.quality = variant.label;
            handle.bandwidth = Some(variant.bandwidth);
        }

        info!(
            channel = %channel.identifier,
            quality = %handle.quality,
            expires_at = ?handle.expires_at,
            "Stream resolved"
        );
        Ok(handle)
    }

    async fn refresh(&self, handle: &StreamHandle, credentials: &Credentials) -> Result<StreamHandle> {
        let url = self.playlist_url(&handle.channel_id, credentials).await?;
        let renewed = handle.with_token_from(&url)?;
        debug!(channel_id = %handle.channel_id, expires_at = ?renewed.expires_at, "Stream token refreshed");
        Ok(renewed)
    }
}
