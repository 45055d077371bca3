//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Errors never leave the recording task that produced them; the variants
/// exist so the task can pick the right recovery path.
#[derive(Error, Debug)]
pub enum Error {
    /// Timeouts, connection failures, 5xx and 429 responses, malformed payloads.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Credentials are missing or were rejected (age restriction, expired cookies).
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The channel is not broadcasting. Expected steady state.
    #[error("Channel is not live")]
    NotLive,

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// A subprocess could not be launched (missing binary, bad permissions).
    #[error("Failed to start pipeline: {0}")]
    PipelineStart(String),

    #[error("Pipeline failed: {0}")]
    PipelineRuntime(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} ({}): {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Errors that should be retried on the next poll without escalation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            return Self::TransientNetwork(err.to_string());
        }
        if let Some(status) = err.status()
            && (status.is_server_error() || status.as_u16() == 429)
        {
            return Self::TransientNetwork(err.to_string());
        }
        if err.is_decode() {
            return Self::TransientNetwork(format!("malformed response: {err}"));
        }
        Self::Http(err)
    }
}
