//! Error types for the offline-worker library.

use thiserror::Error;

/// Errors that can occur while installing, activating or serving requests.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more manifest assets could not be cached during install.
    #[error("install failed, {} asset(s) could not be cached: {}", failed.len(), failed.join(", "))]
    Install {
        /// Manifest paths that failed to fetch or returned a non-200 status.
        failed: Vec<String>,
    },

    /// The network could not produce a response at all.
    #[error("network error: {0}")]
    Network(String),

    /// Cache and network both failed and no fallback document applies.
    #[error("no cached or network response for {url}")]
    NoFallback {
        /// URL of the request that could not be served.
        url: String,
    },

    /// A control message arrived from a foreign origin.
    #[error("message from unauthorized origin: {origin}")]
    UnauthorizedOrigin {
        /// Origin the message claimed to come from.
        origin: String,
    },

    /// Cache storage backend failure.
    #[error("cache storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A URL or manifest path could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON message or push payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for failures the fetch path recovers from via cache fallback.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_))
    }
}

/// A specialized `Result` type for offline-worker operations.
pub type Result<T> = std::result::Result<T, Error>;
