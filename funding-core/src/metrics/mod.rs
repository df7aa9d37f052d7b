//! Engine health counters
//!
//! Updated by the fetch loop, read by the HTTP API. Counters live behind a
//! `parking_lot` lock; per-exchange health sits in a `DashMap` so the API can
//! read one exchange without blocking the writer on the others.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::exchanges::{ExchangeId, FetchErrorKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub retries_scheduled: u64,
    pub give_ups: u64,
    /// Cycles whose results were dropped because the engine was paused
    pub cycles_discarded: u64,
    pub last_cycle_ms: Option<u64>,
    pub samples_ingested: u64,
    pub samples_skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeHealth {
    pub last_entry_count: usize,
    pub last_error: Option<FetchErrorKind>,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cycles: CycleMetrics,
    pub exchanges: BTreeMap<ExchangeId, ExchangeHealth>,
}

#[derive(Debug, Default)]
pub struct EngineMetrics {
    cycles: RwLock<CycleMetrics>,
    exchanges: DashMap<ExchangeId, ExchangeHealth>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_started(&self) {
        self.cycles.write().cycles_started += 1;
    }

    pub fn cycle_succeeded(&self, elapsed: Duration) {
        let mut cycles = self.cycles.write();
        cycles.cycles_succeeded += 1;
        cycles.last_cycle_ms = Some(elapsed.as_millis() as u64);
    }

    pub fn cycle_failed(&self, elapsed: Duration) {
        let mut cycles = self.cycles.write();
        cycles.cycles_failed += 1;
        cycles.last_cycle_ms = Some(elapsed.as_millis() as u64);
    }

    pub fn retry_scheduled(&self) {
        self.cycles.write().retries_scheduled += 1;
    }

    pub fn gave_up(&self) {
        self.cycles.write().give_ups += 1;
    }

    pub fn cycle_discarded(&self) {
        self.cycles.write().cycles_discarded += 1;
    }

    pub fn samples(&self, ingested: u64, skipped: u64) {
        let mut cycles = self.cycles.write();
        cycles.samples_ingested += ingested;
        cycles.samples_skipped += skipped;
    }

    /// Record one adapter's outcome for the current cycle
    pub fn record_fetch(&self, exchange: ExchangeId, entries: usize, error: Option<FetchErrorKind>) {
        let mut health = self.exchanges.entry(exchange).or_default();
        health.last_entry_count = entries;
        health.last_error = error;
        match error {
            Some(_) => health.consecutive_failures += 1,
            None => {
                health.consecutive_failures = 0;
                health.last_success = Some(Utc::now());
            }
        }
    }

    pub fn cycles(&self) -> CycleMetrics {
        self.cycles.read().clone()
    }

    pub fn exchange(&self, exchange: ExchangeId) -> Option<ExchangeHealth> {
        self.exchanges.get(&exchange).map(|h| h.clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            cycles: self.cycles(),
            exchanges: self
                .exchanges
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
        }
    }
}
