//! Error types for the submission engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type SegmaskResult<T> = std::result::Result<T, SegmaskError>;

/// Errors raised by validation, transport, polling, and configuration.
#[derive(Debug, Error)]
pub enum SegmaskError {
    /// Input rejected before any network activity.
    #[error("validation error: {0}")]
    Validation(String),

    /// A batch is already running on this runner.
    #[error("a batch is already running")]
    AlreadyRunning,

    /// Connection failure or non-2xx HTTP status.
    #[error("transport error: {message}")]
    Transport {
        /// HTTP status, when the server answered.
        status: Option<u16>,
        message: String,
    },

    /// Response body did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Polling exhausted its attempts without a ready result.
    #[error("no result received after {attempts} polling attempts")]
    Timeout { attempts: u32 },

    /// Local file could not be read.
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by event consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transport,
    Protocol,
    Timeout,
    Io,
    Config,
    Other,
}

impl SegmaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::AlreadyRunning => ErrorKind::Validation,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Protocol(_) | Self::Json(_) => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::FileRead { .. } | Self::Io(_) => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<reqwest::Error> for SegmaskError {
    fn from(err: reqwest::Error) -> Self {
        // Body decode failures mean the server answered with something other than JSON.
        if err.is_decode() {
            return Self::Protocol(format!("malformed response body: {}", err));
        }
        Self::Transport { status: err.status().map(|s| s.as_u16()), message: err.to_string() }
    }
}

impl From<toml::de::Error> for SegmaskError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Maps a non-success HTTP status to a transport error.
pub(crate) fn map_http_error(status: reqwest::StatusCode, body: &str, operation: &str) -> SegmaskError {
    let message = match status.as_u16() {
        400 => format!("invalid request for {}: {}", operation, body),
        401 | 403 => format!("authentication failed for {}: {}", operation, body),
        404 => format!("not found for {}: {}", operation, body),
        413 => format!("file too large for {}: {}", operation, body),
        429 => format!("rate limited for {}: {}", operation, body),
        500..=599 => format!("server error for {} ({}): {}", operation, status, body),
        _ => format!("unexpected status for {} ({}): {}", operation, status, body),
    };
    SegmaskError::Transport { status: Some(status.as_u16()), message }
}
