//! Spread and funding-rate history persistence
//!
//! The engine appends one spread record per ingested sample and one funding
//! record per normalized rate; the HTTP API reads recent records back and a
//! background task prunes old ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use thiserror::Error;

use crate::exchanges::{ExchangeId, Symbol};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadRecord {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub mark_price: f64,
    pub oracle_price: f64,
    pub spread_bps: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRecord {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    /// Hourly funding rate
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

/// Rows removed by one pruning pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub spreads: usize,
    pub funding_rates: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.spreads + self.funding_rates
    }
}

/// Records newer than `max_age`, optionally narrowed to one symbol and/or exchange
#[derive(Clone, Debug, PartialEq)]
pub struct SpreadQuery {
    pub max_age: Duration,
    pub symbol: Option<Symbol>,
    pub exchange: Option<ExchangeId>,
}

impl SpreadQuery {
    pub fn within(max_age: Duration) -> Self {
        Self {
            max_age,
            symbol: None,
            exchange: None,
        }
    }

    pub fn symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn exchange(mut self, exchange: ExchangeId) -> Self {
        self.exchange = Some(exchange);
        self
    }

    fn cutoff(&self, now: DateTime<Utc>) -> StoreResult<DateTime<Utc>> {
        let age = chrono::Duration::from_std(self.max_age)
            .map_err(|_| StoreError::InvalidQuery(format!("window {:?} out of range", self.max_age)))?;
        Ok(now - age)
    }

    fn matches(&self, exchange: ExchangeId, symbol: &Symbol, timestamp: DateTime<Utc>, cutoff: DateTime<Utc>) -> bool {
        timestamp >= cutoff
            && self.symbol.as_ref().map_or(true, |s| symbol == s)
            && self.exchange.map_or(true, |e| exchange == e)
    }
}

#[async_trait]
pub trait SpreadStore: Send + Sync {
    async fn append(&self, batch: Vec<SpreadRecord>) -> StoreResult<()>;

    async fn recent(&self, query: &SpreadQuery) -> StoreResult<Vec<SpreadRecord>>;

    async fn append_funding(&self, batch: Vec<FundingRecord>) -> StoreResult<()>;

    async fn recent_funding(&self, query: &SpreadQuery) -> StoreResult<Vec<FundingRecord>>;

    /// Delete spread and funding records older than the given number of days
    async fn prune(&self, older_than_days: u32) -> StoreResult<PruneReport>;
}

fn push_bounded<T>(records: &mut VecDeque<T>, batch: Vec<T>, capacity: usize) {
    records.extend(batch);
    while records.len() > capacity {
        records.pop_front();
    }
}

/// Bounded in-process store; each table drops its oldest records at capacity
pub struct InMemorySpreadStore {
    records: RwLock<VecDeque<SpreadRecord>>,
    funding: RwLock<VecDeque<FundingRecord>>,
    capacity: usize,
}

impl InMemorySpreadStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            funding: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn recent_at(&self, query: &SpreadQuery, now: DateTime<Utc>) -> StoreResult<Vec<SpreadRecord>> {
        let cutoff = query.cutoff(now)?;
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| query.matches(r.exchange, &r.symbol, r.timestamp, cutoff))
            .cloned()
            .collect())
    }

    pub fn funding_len(&self) -> usize {
        self.funding.read().len()
    }

    pub fn recent_funding_at(&self, query: &SpreadQuery, now: DateTime<Utc>) -> StoreResult<Vec<FundingRecord>> {
        let cutoff = query.cutoff(now)?;
        Ok(self
            .funding
            .read()
            .iter()
            .filter(|r| query.matches(r.exchange, &r.symbol, r.timestamp, cutoff))
            .cloned()
            .collect())
    }

    pub fn prune_at(&self, older_than_days: u32, now: DateTime<Utc>) -> PruneReport {
        let cutoff = now - chrono::Duration::days(older_than_days as i64);

        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let spreads = before - records.len();
        drop(records);

        let mut funding = self.funding.write();
        let before = funding.len();
        funding.retain(|r| r.timestamp >= cutoff);

        PruneReport {
            spreads,
            funding_rates: before - funding.len(),
        }
    }
}

#[async_trait]
impl SpreadStore for InMemorySpreadStore {
    async fn append(&self, batch: Vec<SpreadRecord>) -> StoreResult<()> {
        push_bounded(&mut self.records.write(), batch, self.capacity);
        Ok(())
    }

    async fn recent(&self, query: &SpreadQuery) -> StoreResult<Vec<SpreadRecord>> {
        self.recent_at(query, Utc::now())
    }

    async fn append_funding(&self, batch: Vec<FundingRecord>) -> StoreResult<()> {
        push_bounded(&mut self.funding.write(), batch, self.capacity);
        Ok(())
    }

    async fn recent_funding(&self, query: &SpreadQuery) -> StoreResult<Vec<FundingRecord>> {
        self.recent_funding_at(query, Utc::now())
    }

    async fn prune(&self, older_than_days: u32) -> StoreResult<PruneReport> {
        Ok(self.prune_at(older_than_days, Utc::now()))
    }
}

/// Windowed view of one (symbol, exchange) pair
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadSummary {
    pub average: f64,
    pub current: f64,
    pub mark_price: f64,
    pub oracle_price: f64,
    pub samples: usize,
}

/// Group records by symbol and exchange: mean spread plus the latest prices
pub fn summarize(records: &[SpreadRecord]) -> BTreeMap<Symbol, BTreeMap<ExchangeId, SpreadSummary>> {
    let mut groups: BTreeMap<(Symbol, ExchangeId), Vec<&SpreadRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.symbol.clone(), record.exchange))
            .or_default()
            .push(record);
    }

    let mut summary: BTreeMap<Symbol, BTreeMap<ExchangeId, SpreadSummary>> = BTreeMap::new();
    for ((symbol, exchange), group) in groups {
        let Some(latest) = group.iter().max_by_key(|r| r.timestamp) else {
            continue;
        };
        let average = group.iter().map(|r| r.spread_bps).sum::<f64>() / group.len() as f64;
        summary.entry(symbol).or_default().insert(
            exchange,
            SpreadSummary {
                average,
                current: latest.spread_bps,
                mark_price: latest.mark_price,
                oracle_price: latest.oracle_price,
                samples: group.len(),
            },
        );
    }
    summary
}
