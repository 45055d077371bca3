//! Stream resolution and the token-refresh contract.
//!
//! `resolve` turns a live channel into a [`StreamHandle`]. `refresh` renews
//! the token of an existing handle so a running fetcher can keep going past
//! the original expiry. A refresh failure never stops a recording; the task
//! falls back to a full `resolve` before its next attempt.

pub mod chzzk;
pub mod token;

use async_trait::async_trait;

use crate::Result;
use crate::config::{Channel, Credentials};

pub use chzzk::ChzzkResolver;
pub use token::StreamHandle;

#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolve a playable stream.
    ///
    /// Fails with [`Error::NotLive`](crate::Error::NotLive) when the channel
    /// is offline and [`Error::Auth`](crate::Error::Auth) when playback is
    /// withheld for lack of valid credentials.
    async fn resolve(&self, channel: &Channel, credentials: &Credentials) -> Result<StreamHandle>;

    /// Renew the token of `handle` without changing the stream it points to.
    async fn refresh(&self, handle: &StreamHandle, credentials: &Credentials) -> Result<StreamHandle>;
}
