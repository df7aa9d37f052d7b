//! Exchange error types

use super::types::FetchErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Network timeout")]
    Timeout,

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ExchangeError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Connection(_) | Self::Timeout | Self::Unknown(_) => FetchErrorKind::Transport,
            Self::HttpStatus { .. } => FetchErrorKind::Transport,
            Self::Parse(_) => FetchErrorKind::Malformed,
            Self::Api { .. } => FetchErrorKind::ExchangeReported,
            Self::RateLimit(_) => FetchErrorKind::RateLimited,
        }
    }

    /// Classify a non-success HTTP status, keeping throttling distinct
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 | 418 => Self::RateLimit(format!("HTTP {}", status)),
            _ => Self::HttpStatus { status, body },
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}
