//! HTTP client for the Chzzk live-detail API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, trace};

use super::models::{ApiResponse, LiveDetail, LiveStatus};
use crate::config::Credentials;
use crate::{Error, Result};

/// Base URL of the Chzzk service API.
pub const DEFAULT_API_BASE: &str = "https://api.chzzk.naver.com";

const USER_AGENT: &str = "Mozilla/5.0 (X11; Unix x86_64)";
const ORIGIN: &str = "https://chzzk.naver.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Polls whether a channel is broadcasting.
#[async_trait]
pub trait LiveStatusClient: Send + Sync {
    /// Current live status of `channel_id`.
    ///
    /// Errors are either [`Error::TransientNetwork`] (retry on the next poll)
    /// or permanent ([`Error::ChannelNotFound`], [`Error::Auth`]).
    async fn live_status(&self, channel_id: &str, credentials: &Credentials) -> Result<LiveStatus>;
}

/// Request headers shared by the API client and the fetcher subprocess.
pub fn auth_headers(credentials: &Credentials) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("User-Agent", USER_AGENT.to_string()),
        ("Origin", ORIGIN.to_string()),
        ("Referer", format!("{ORIGIN}/")),
        ("DNT", "1".to_string()),
        ("Sec-GPC", "1".to_string()),
    ];
    if let Some(cookie) = credentials.cookie_header() {
        headers.push(("Cookie", cookie));
    }
    headers
}

pub(crate) fn header_map(credentials: &Credentials) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in auth_headers(credentials) {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!(header = name, "Skipping header with invalid characters"),
        }
    }
    map
}

/// Chzzk API client.
#[derive(Debug, Clone)]
pub struct ChzzkClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChzzkClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_BASE, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Shared HTTP client, used for playlist fetches.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn live_detail_url(&self, channel_id: &str) -> String {
        format!("{}/service/v3/channels/{channel_id}/live-detail", self.base_url)
    }

    /// Raw live-detail lookup. `Ok(None)` means the API returned no content.
    pub async fn live_detail(
        &self,
        channel_id: &str,
        credentials: &Credentials,
    ) -> Result<Option<LiveDetail>> {
        let response = self
            .http
            .get(self.live_detail_url(channel_id))
            .headers(header_map(credentials))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        trace!(channel_id, %status, bytes = body.len(), "live-detail response");
        parse_live_detail(channel_id, status, &body)
    }

    /// Fetch a playlist body with the same headers as API calls.
    pub async fn fetch_text(&self, url: &str, credentials: &Credentials) -> Result<String> {
        let response = self
            .http
            .get(url)
            .headers(header_map(credentials))
            .send()
            .await?;
        let status = response.status();
        if let Some(err) = status_error(url, status) {
            return Err(err);
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl LiveStatusClient for ChzzkClient {
    async fn live_status(&self, channel_id: &str, credentials: &Credentials) -> Result<LiveStatus> {
        let detail = self.live_detail(channel_id, credentials).await?;
        LiveStatus::from_detail(detail)
    }
}

fn status_error(what: &str, status: StatusCode) -> Option<Error> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => Error::ChannelNotFound(what.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::auth(format!("{what}: HTTP {status}"))
        }
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            Error::transient(format!("{what}: HTTP {status}"))
        }
        _ => Error::Other(format!("{what}: unexpected HTTP {status}")),
    })
}

/// Map an HTTP status and body to the live-detail content.
pub fn parse_live_detail(
    channel_id: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<Option<LiveDetail>> {
    if let Some(err) = status_error(channel_id, status) {
        return Err(err);
    }

    let response: ApiResponse<LiveDetail> = serde_json::from_slice(body)
        .map_err(|e| Error::transient(format!("malformed live-detail response: {e}")))?;

    match response.code {
        200 => Ok(response.content),
        404 => Err(Error::ChannelNotFound(channel_id.to_string())),
        code => Err(Error::transient(format!(
            "live-detail API error {code}: {}",
            response.message.unwrap_or_default()
        ))),
    }
}
