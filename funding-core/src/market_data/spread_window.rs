//! Rolling mark/oracle spread windows per (exchange, symbol)

use crate::exchanges::{ExchangeId, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One observation inside a window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpreadSample {
    pub timestamp: DateTime<Utc>,
    pub spread_bps: f64,
}

/// Statistics derived from a window on demand
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadStats {
    pub current: Option<f64>,
    pub average: Option<f64>,
    pub sample_count: usize,
    pub is_complete: bool,
}

/// Time-ordered samples for one (exchange, symbol)
#[derive(Clone, Debug)]
pub struct SpreadWindow {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    samples: VecDeque<SpreadSample>,
}

impl SpreadWindow {
    fn new(exchange: ExchangeId, symbol: Symbol) -> Self {
        Self {
            exchange,
            symbol,
            samples: VecDeque::new(),
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &SpreadSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn newest(&self) -> Option<&SpreadSample> {
        self.samples.back()
    }

    /// Drop the prefix that has aged out of `(now - retention, now]`
    fn evict(&mut self, now: DateTime<Utc>, retention: chrono::Duration) {
        let cutoff = now - retention;
        while self.samples.front().map_or(false, |s| s.timestamp <= cutoff) {
            self.samples.pop_front();
        }
    }

    fn stats(&self, expected_samples: usize) -> SpreadStats {
        let sample_count = self.samples.len();
        let average = (sample_count > 0)
            .then(|| self.samples.iter().map(|s| s.spread_bps).sum::<f64>() / sample_count as f64);

        SpreadStats {
            current: self.newest().map(|s| s.spread_bps),
            average,
            sample_count,
            is_complete: sample_count >= expected_samples,
        }
    }
}

/// Window sizing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub retention_window: Duration,
    pub poll_interval: Duration,
}

impl WindowConfig {
    /// Samples a full retention window holds at the expected cadence
    pub fn expected_samples(&self) -> usize {
        let poll_ms = self.poll_interval.as_millis().max(1);
        ((self.retention_window.as_millis() / poll_ms) as usize).max(1)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            retention_window: Duration::from_secs(300),
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// Owner of every spread window.
///
/// Eviction only happens on [`ingest`](Self::ingest); reading statistics
/// never changes what a window holds.
#[derive(Debug)]
pub struct SpreadWindowTracker {
    windows: HashMap<(ExchangeId, Symbol), SpreadWindow>,
    retention: chrono::Duration,
    expected_samples: usize,
}

impl SpreadWindowTracker {
    pub fn new(config: WindowConfig) -> Self {
        let retention_ms = i64::try_from(config.retention_window.as_millis()).unwrap_or(i64::MAX);
        Self {
            windows: HashMap::new(),
            retention: chrono::Duration::milliseconds(retention_ms),
            expected_samples: config.expected_samples(),
        }
    }

    /// Append a sample and trim the window. Returns false if the sample
    /// is older than the window's newest one and was dropped.
    pub fn ingest(&mut self, exchange: ExchangeId, symbol: &Symbol, spread_bps: f64, timestamp: DateTime<Utc>) -> bool {
        let window = self
            .windows
            .entry((exchange, symbol.clone()))
            .or_insert_with(|| SpreadWindow::new(exchange, symbol.clone()));

        if window.newest().map_or(false, |newest| timestamp < newest.timestamp) {
            return false;
        }

        window.samples.push_back(SpreadSample { timestamp, spread_bps });
        window.evict(timestamp, self.retention);
        true
    }

    /// Statistics for a key; an unknown key yields empty statistics
    pub fn stats(&self, exchange: ExchangeId, symbol: &Symbol) -> SpreadStats {
        self.window(exchange, symbol)
            .map(|w| w.stats(self.expected_samples))
            .unwrap_or_default()
    }

    /// Statistics only where the window holds at least one sample
    pub fn window_stats(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<SpreadStats> {
        self.window(exchange, symbol)
            .filter(|w| !w.is_empty())
            .map(|w| w.stats(self.expected_samples))
    }

    pub fn window(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<&SpreadWindow> {
        self.windows.get(&(exchange, symbol.clone()))
    }

    pub fn expected_samples(&self) -> usize {
        self.expected_samples
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}
