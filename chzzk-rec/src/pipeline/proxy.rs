//! Loopback HLS playlist proxy sitting between the fetcher and the CDN.
//!
//! The fetcher is pointed at `http://127.0.0.1:<port>/live.m3u8` instead of
//! the CDN. Every playlist reload is fetched upstream with the token of the
//! current [`StreamHandle`], so a renewed token takes effect on the fetcher's
//! next reload without restarting it. Segment URIs are rewritten to absolute
//! CDN URLs and fetched by the fetcher directly.
//!
//! When the CDN rejects a playlist request the proxy asks for an immediate
//! token refresh, waits briefly for the renewed handle and retries once.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::Credentials;
use crate::monitor::client::header_map;
use crate::resolver::StreamHandle;
use crate::resolver::chzzk::select_variant;
use crate::resolver::token::carry_token;
use crate::{Error, Result};

/// Path the fetcher requests.
pub const PLAYLIST_PATH: &str = "/live.m3u8";

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// How long a rejected request waits for a renewed token.
const REFRESH_WAIT: Duration = Duration::from_secs(15);

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct CachedVariant {
    master_url: String,
    variant_url: String,
}

#[derive(Clone)]
struct ProxyState {
    http: reqwest::Client,
    credentials: Credentials,
    quality: String,
    handle: watch::Receiver<StreamHandle>,
    refresh_now: Arc<Notify>,
    variant: Arc<Mutex<Option<CachedVariant>>>,
}

/// A running proxy for one recording attempt.
pub struct PlaylistProxy {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PlaylistProxy {
    /// Bind an ephemeral loopback port and start serving.
    ///
    /// `handle` follows the refreshed stream handle; `refresh_now` is
    /// notified when the CDN rejects the current token.
    pub async fn start(
        http: reqwest::Client,
        credentials: Credentials,
        quality: impl Into<String>,
        handle: watch::Receiver<StreamHandle>,
        refresh_now: Arc<Notify>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| Error::PipelineStart(format!("failed to bind playlist proxy: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::PipelineStart(format!("playlist proxy has no address: {e}")))?;

        let state = ProxyState {
            http,
            credentials,
            quality: quality.into(),
            handle,
            refresh_now,
            variant: Arc::new(Mutex::new(None)),
        };
        let router = Router::new()
            .route(PLAYLIST_PATH, get(serve_playlist))
            .with_state(state);

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                warn!(error = %e, "Playlist proxy stopped with an error");
            }
        });

        debug!(%addr, "Playlist proxy listening");
        Ok(Self { addr, shutdown, task })
    }

    /// URL handed to the fetcher.
    pub fn url(&self) -> String {
        format!("http://{}{PLAYLIST_PATH}", self.addr)
    }

    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, &mut self.task).await.is_err() {
            self.task.abort();
        }
    }
}

impl Drop for PlaylistProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_playlist(State(state): State<ProxyState>) -> Response {
    match state.playlist().await {
        Ok(body) => ([(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Playlist proxy request failed");
            let status = match e {
                Error::Auth(_) => StatusCode::FORBIDDEN,
                Error::NotLive => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, e.to_string()).into_response()
        }
    }
}

impl ProxyState {
    async fn playlist(&self) -> Result<String> {
        let mut handle = self.handle.clone();
        handle.borrow_and_update();

        match self.media_playlist().await {
            Err(e) if e.is_auth() || matches!(e, Error::NotLive) => {
                debug!(error = %e, "CDN rejected the playlist, requesting a token refresh");
                self.refresh_now.notify_one();
                if tokio::time::timeout(REFRESH_WAIT, handle.changed()).await.is_err() {
                    return Err(e);
                }
                self.media_playlist().await
            }
            other => other,
        }
    }

    async fn media_playlist(&self) -> Result<String> {
        let master_url = self.handle.borrow().url.clone();
        let variant_url = self.variant_url(&master_url).await?;
        let body = self.get_text(&variant_url).await?;
        rewrite_media_playlist(&body, &variant_url)
    }

    /// Media playlist URL for the current master, cached per token.
    async fn variant_url(&self, master_url: &str) -> Result<String> {
        let cached = self
            .variant
            .lock()
            .as_ref()
            .filter(|c| c.master_url == master_url)
            .map(|c| c.variant_url.clone());
        if let Some(url) = cached {
            return Ok(url);
        }

        let body = self.get_text(master_url).await?;
        let variant_url = match select_variant(body.as_bytes(), &self.quality)? {
            Some(variant) => carry_token(&absolute(master_url, &variant.uri)?, master_url)?,
            None => master_url.to_string(),
        };
        debug!(variant = %without_query(&variant_url), "Selected media playlist");

        *self.variant.lock() = Some(CachedVariant {
            master_url: master_url.to_string(),
            variant_url: variant_url.clone(),
        });
        Ok(variant_url)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .headers(header_map(&self.credentials))
            .send()
            .await?;
        let status = response.status();
        let what = without_query(url);
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::auth(format!("{what}: HTTP {status}")));
        }
        if status.is_client_error() {
            debug!(url = %what, %status, "Playlist gone");
            return Err(Error::NotLive);
        }
        if !status.is_success() {
            return Err(Error::transient(format!("{what}: HTTP {status}")));
        }
        Ok(response.text().await?)
    }
}

fn without_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn absolute(base: &str, uri: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| Error::Other(format!("invalid playlist URL: {e}")))?;
    base.join(uri)
        .map(String::from)
        .map_err(|e| Error::Other(format!("invalid playlist entry {uri}: {e}")))
}

/// Rewrite every URI of a media playlist (segment lines and `URI="..."`
/// attributes) to an absolute URL against `base`.
pub fn rewrite_media_playlist(body: &str, base: &str) -> Result<String> {
    let base = Url::parse(base).map_err(|e| Error::Other(format!("invalid playlist URL: {e}")))?;
    let join = |uri: &str| base.join(uri).map(String::from).unwrap_or_else(|_| uri.to_string());

    let mut out = String::with_capacity(body.len() + 512);
    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            out.push_str(&rewrite_uri_attribute(line, join));
        } else {
            out.push_str(&join(line));
        }
        out.push('\n');
    }
    Ok(out)
}

fn rewrite_uri_attribute(line: &str, join: impl Fn(&str) -> String) -> String {
    const ATTR: &str = "URI=\"";
    let Some(start) = line.find(ATTR).map(|i| i + ATTR.len()) else {
        return line.to_string();
    };
    let Some(len) = line[start..].find('"') else {
        return line.to_string();
    };
    let end = start + len;
    format!("{}{}{}", &line[..start], join(&line[start..end]), &line[end..])
}
