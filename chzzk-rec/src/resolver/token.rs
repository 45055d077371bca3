//! Stream handles and the `hdnts` token carried in their query string.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use url::Url;

use crate::{Error, Result};

/// Query parameter holding the CDN auth token.
pub const TOKEN_PARAM: &str = "hdnts";
/// Query parameter holding the token expiry (unix seconds).
pub const EXPIRY_PARAM: &str = "exp";

/// Minimum time between issuing a handle and refreshing it.
pub const MIN_REFRESH_AFTER: ChronoDuration = ChronoDuration::seconds(60);

/// A resolved, playable stream.
///
/// Owned by the recording task that resolved it. Replaced wholesale on
/// refresh; never shared between tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHandle {
    pub channel_id: String,
    /// Master playlist URL, token included.
    pub url: String,
    /// Label of the best variant, e.g. `1920x1080`.
    pub quality: String,
    /// Bandwidth of the best variant in bits per second.
    pub bandwidth: Option<u64>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StreamHandle {
    pub fn new(channel_id: impl Into<String>, url: impl Into<String>, quality: impl Into<String>) -> Self {
        let url = url.into();
        let expires_at = expiry_from_url(&url);
        Self {
            channel_id: channel_id.into(),
            url,
            quality: quality.into(),
            bandwidth: None,
            issued_at: Utc::now(),
            expires_at,
        }
    }

    /// When to renew the token, `None` if the URL carries no expiry.
    pub fn refresh_at(&self, lead: ChronoDuration) -> Option<DateTime<Utc>> {
        let expires_at = self.expires_at?;
        Some((expires_at - lead).max(self.issued_at + MIN_REFRESH_AFTER))
    }

    /// Copy of this handle with the token of `fresh_url` spliced in.
    pub fn with_token_from(&self, fresh_url: &str) -> Result<Self> {
        let url = replace_token(&self.url, fresh_url)?;
        Ok(Self {
            expires_at: expiry_from_url(&url),
            issued_at: Utc::now(),
            url,
            ..self.clone()
        })
    }

    pub fn token(&self) -> Option<String> {
        query_value(&self.url, TOKEN_PARAM)
    }
}

fn query_value(url: &str, key: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Token expiry from the `exp` parameter, falling back to the `exp=` field
/// embedded in `hdnts`.
pub fn expiry_from_url(url: &str) -> Option<DateTime<Utc>> {
    let secs = query_value(url, EXPIRY_PARAM)
        .and_then(|v| v.parse::<i64>().ok())
        .or_else(|| {
            let token = query_value(url, TOKEN_PARAM)?;
            token
                .split('~')
                .find_map(|field| field.strip_prefix("exp="))
                .and_then(|v| v.parse::<i64>().ok())
        })?;
    Utc.timestamp_opt(secs, 0).single()
}

/// Replace the token parameters of `current` with those of `fresh`, keeping
/// every other part of `current` byte for byte.
pub fn replace_token(current: &str, fresh: &str) -> Result<String> {
    let mut current_url =
        Url::parse(current).map_err(|e| Error::Other(format!("invalid stream URL: {e}")))?;
    let fresh_url =
        Url::parse(fresh).map_err(|e| Error::Other(format!("invalid renewed URL: {e}")))?;

    let fresh_pairs: Vec<&str> = fresh_url.query().unwrap_or("").split('&').collect();
    let raw_pair = |key: &str| {
        fresh_pairs
            .iter()
            .find(|pair| pair.split('=').next() == Some(key))
            .map(|pair| pair.to_string())
    };

    let Some(token_pair) = raw_pair(TOKEN_PARAM) else {
        return Err(Error::auth("renewed stream URL carries no token"));
    };
    let expiry_pair = raw_pair(EXPIRY_PARAM);

    let mut pairs: Vec<String> = Vec::new();
    let mut has_token = false;
    for pair in current_url.query().unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        match pair.split('=').next() {
            Some(TOKEN_PARAM) => {
                pairs.push(token_pair.clone());
                has_token = true;
            }
            Some(EXPIRY_PARAM) => pairs.push(expiry_pair.clone().unwrap_or_else(|| pair.to_string())),
            _ => pairs.push(pair.to_string()),
        }
    }
    if !has_token {
        pairs.push(token_pair);
    }

    current_url.set_query(Some(&pairs.join("&")));
    Ok(current_url.to_string())
}

/// `url` with the token of `from` when it carries none of its own.
///
/// Variant and segment URIs inside a playlist may rely on the token of the
/// playlist that listed them.
pub fn carry_token(url: &str, from: &str) -> Result<String> {
    if query_value(url, TOKEN_PARAM).is_some() || query_value(from, TOKEN_PARAM).is_none() {
        return Ok(url.to_string());
    }
    replace_token(url, from)
}
