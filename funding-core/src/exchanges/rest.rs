//! Shared REST plumbing for the funding adapters

use super::errors::ExchangeError;
use super::types::{ExchangeId, FetchOutcome, RawFundingEntry};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Custom result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

const MAX_ERROR_BODY: usize = 256;

/// Per-adapter connection settings
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Native funding interval; rates are divided by this to get a per-hour rate
    pub funding_interval_hours: u32,
}

impl AdapterConfig {
    pub fn new(base_url: impl Into<String>, funding_interval_hours: u32) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            funding_interval_hours,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn hourly_rate(&self, native_rate: f64) -> f64 {
        native_rate / self.funding_interval_hours.max(1) as f64
    }
}

/// Read the body of a response, turning non-success statuses into errors
pub(crate) async fn read_body(response: reqwest::Response) -> ExchangeResult<String> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ExchangeError::from_status(status.as_u16(), truncate_body(body, MAX_ERROR_BODY)));
    }
    Ok(body)
}

/// Cut an error body to at most `max` bytes without splitting a character
fn truncate_body(mut body: String, max: usize) -> String {
    if body.len() > max {
        let cut = (0..=max).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        body.truncate(cut);
    }
    body
}

/// Parse an exchange decimal string; empty, unparsable or non-finite values are absent
pub fn parse_decimal(raw: Option<&str>) -> Option<f64> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Decode each list item on its own, dropping the ones that do not fit
pub(crate) fn decode_each<T: DeserializeOwned>(exchange: ExchangeId, items: Vec<serde_json::Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(%exchange, error = %e, "skipping malformed entry");
                None
            }
        })
        .collect()
}

/// Collapse an adapter result into the fail-soft outcome handed to the engine
pub(crate) fn fail_soft(exchange: ExchangeId, result: ExchangeResult<Vec<RawFundingEntry>>) -> FetchOutcome {
    match result {
        Ok(entries) => {
            debug!(%exchange, count = entries.len(), "fetched funding entries");
            FetchOutcome::ok(entries)
        }
        Err(e) => {
            let kind = e.kind();
            warn!(%exchange, error = %e, ?kind, "funding fetch failed");
            FetchOutcome::failed(kind)
        }
    }
}
