//! Fetch orchestration and cross-exchange aggregation

pub mod aggregator;
pub mod orchestrator;

pub use aggregator::Aggregator;
pub use orchestrator::{backoff_delay, CycleError, FetchOrchestrator, OrchestratorHandle};

use crate::exchanges::{ExchangeId, FetchErrorKind, Symbol};
use crate::market_data::SpreadStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One exchange's contribution to a combined record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeQuote {
    pub funding_rate: Option<f64>,
    pub spread_stats: Option<SpreadStats>,
}

/// Per-symbol view across all exchanges, plus the base exchange's market context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedRecord {
    pub symbol: Symbol,
    pub per_exchange: BTreeMap<ExchangeId, ExchangeQuote>,
    pub day_volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub oracle_price: Option<f64>,
    pub premium: Option<f64>,
    pub prev_day_price: Option<f64>,
    pub impact_prices: (Option<f64>, Option<f64>),
}

impl CombinedRecord {
    pub fn quote(&self, exchange: ExchangeId) -> Option<&ExchangeQuote> {
        self.per_exchange.get(&exchange)
    }

    pub fn funding_rate(&self, exchange: ExchangeId) -> Option<f64> {
        self.quote(exchange).and_then(|q| q.funding_rate)
    }
}

/// What consumers should show
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum EngineStatus {
    Loading,
    Ready,
    Error(String),
}

/// Where the fetch state machine currently is
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EnginePhase {
    Idle,
    Fetching,
    BackoffWait { attempt: u32, retry_in_ms: u64 },
    GaveUp,
    Paused,
}

/// Immutable view published after every state change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    pub phase: EnginePhase,
    pub records: Vec<CombinedRecord>,
    /// Last fetch outcome per exchange; `None` means the fetch succeeded
    pub exchange_status: BTreeMap<ExchangeId, Option<FetchErrorKind>>,
    /// Number of cycles whose records were published
    pub cycle: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EngineSnapshot {
    pub fn loading() -> Self {
        Self {
            status: EngineStatus::Loading,
            phase: EnginePhase::Idle,
            records: Vec::new(),
            exchange_status: BTreeMap::new(),
            cycle: 0,
            updated_at: None,
        }
    }

    pub fn record(&self, symbol: &Symbol) -> Option<&CombinedRecord> {
        self.records.iter().find(|r| &r.symbol == symbol)
    }

    /// Exchanges whose last fetch reported an error
    pub fn degraded_exchanges(&self) -> Vec<ExchangeId> {
        self.exchange_status
            .iter()
            .filter(|(_, error)| error.is_some())
            .map(|(exchange, _)| *exchange)
            .collect()
    }
}
