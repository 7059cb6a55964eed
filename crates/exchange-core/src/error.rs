//! Error types for the exchange feed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Session rejected by the exchange (HTTP 401/403 or an invalid-session API code).
    #[error("Unauthorized (status {status:?}): {message}")]
    Unauthorized { message: String, status: Option<u16> },

    /// HTTP 429 or the vendor's "too much data" response.
    #[error("Rate limited: {reason}")]
    RateLimited { reason: String },

    /// Timeout, connection failure, or 5xx.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },
}

impl Error {
    /// Classify a transport-level failure from reqwest.
    ///
    /// Timeouts and connection errors become [`Error::UpstreamUnavailable`] so the
    /// poller applies its fixed backoff instead of treating them as fatal.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Error::UpstreamUnavailable {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Error::MalformedResponse {
                message: err.to_string(),
            }
        } else {
            Error::Http(err)
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
