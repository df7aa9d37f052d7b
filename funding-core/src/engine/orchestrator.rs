//! Fetch scheduler
//!
//! A single task owns the spread windows and runs every cycle: timer ticks,
//! backoff retries and control messages are all multiplexed through one
//! `select!` loop, so window state never needs a lock. Consumers read the
//! latest [`EngineSnapshot`] from a watch channel.

use super::{Aggregator, EnginePhase, EngineSnapshot, EngineStatus};
use crate::config::EngineConfig;
use crate::exchanges::{ExchangeId, FetchOutcome, FundingAdapter, FundingRate, RawFundingEntry};
use crate::market_data::{SpreadWindowTracker, SymbolNormalizer};
use crate::metrics::EngineMetrics;
use crate::store::{FundingRecord, SpreadRecord, SpreadStore};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SHIFT: u32 = 16;

/// Delay before retry number `attempt` (1-based): `initial * 2^(attempt - 1)`
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    initial.saturating_mul(1u32 << shift)
}

/// Failures that abort a whole cycle rather than one exchange's data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("{0} rate limited the request")]
    RateLimited(ExchangeId),

    #[error("{0} adapter task failed: {1}")]
    AdapterPanicked(ExchangeId, String),
}

#[derive(Debug)]
enum ControlMessage {
    Pause,
    Resume,
    Refresh,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Retry,
    Manual,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Cloneable control and read access to a running orchestrator.
///
/// Control methods return `false` once the orchestrator has stopped.
#[derive(Clone)]
pub struct OrchestratorHandle {
    control: mpsc::UnboundedSender<ControlMessage>,
    snapshots: watch::Receiver<Arc<EngineSnapshot>>,
}

impl OrchestratorHandle {
    /// Stop scheduled ticks and cancel any pending retry
    pub fn pause(&self) -> bool {
        self.send(ControlMessage::Pause)
    }

    /// Restart the timer and fetch immediately
    pub fn resume(&self) -> bool {
        self.send(ControlMessage::Resume)
    }

    /// Fetch now, skipping spacing and any pending backoff
    pub fn refresh(&self) -> bool {
        self.send(ControlMessage::Refresh)
    }

    pub fn shutdown(&self) -> bool {
        self.send(ControlMessage::Shutdown)
    }

    pub fn latest(&self) -> Arc<EngineSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshots.clone()
    }

    fn send(&self, message: ControlMessage) -> bool {
        self.control.send(message).is_ok()
    }
}

#[derive(Debug, Default)]
struct LoopState {
    paused: bool,
    /// Gave up with halting enabled; only resume or refresh restart fetching
    halted: bool,
    attempt: u32,
    backoff_deadline: Option<Instant>,
    last_fetch_started: Option<Instant>,
}

pub struct FetchOrchestrator {
    adapters: Vec<Arc<dyn FundingAdapter>>,
    normalizer: SymbolNormalizer,
    tracker: SpreadWindowTracker,
    aggregator: Aggregator,
    store: Option<Arc<dyn SpreadStore>>,
    metrics: Arc<EngineMetrics>,

    poll_interval: Duration,
    min_fetch_spacing: Duration,
    initial_backoff: Duration,
    max_retries: u32,
    halt_on_give_up: bool,

    snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
    state: LoopState,
}

impl FetchOrchestrator {
    pub fn new(config: &EngineConfig, adapters: Vec<Arc<dyn FundingAdapter>>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(EngineSnapshot::loading()));

        Self {
            adapters,
            normalizer: SymbolNormalizer::new(),
            tracker: SpreadWindowTracker::new(config.window_config()),
            aggregator: Aggregator::new(ExchangeId::Hyperliquid),
            store: None,
            metrics: Arc::new(EngineMetrics::new()),
            poll_interval: config.poll_interval,
            min_fetch_spacing: config.min_fetch_spacing,
            initial_backoff: config.initial_backoff,
            max_retries: config.max_retries,
            halt_on_give_up: config.halt_on_give_up,
            snapshot_tx,
            state: LoopState::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SpreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Exchange whose universe enumerates the combined records
    pub fn with_base_exchange(mut self, base: ExchangeId) -> Self {
        self.aggregator = Aggregator::new(base);
        self
    }

    pub fn spawn(self) -> (OrchestratorHandle, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = OrchestratorHandle {
            control: control_tx,
            snapshots: self.snapshot_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(control_rx));
        (handle, task)
    }

    async fn run(mut self, mut control: mpsc::UnboundedReceiver<ControlMessage>) {
        let base = self.aggregator.base();
        if !self.adapters.iter().any(|a| a.exchange() == base) {
            warn!(%base, "no adapter for the base exchange; combined records will be empty");
        }
        info!(
            adapters = self.adapters.len(),
            %base,
            poll_secs = self.poll_interval.as_secs(),
            "🚀 Fetch orchestrator started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let ticking = !self.state.paused && !self.state.halted && self.state.backoff_deadline.is_none();
            let backoff = self.state.backoff_deadline;

            let trigger = tokio::select! {
                message = control.recv() => match message {
                    Some(ControlMessage::Pause) => {
                        self.pause();
                        None
                    }
                    Some(ControlMessage::Resume) => self.resume(),
                    Some(ControlMessage::Refresh) => self.refresh(),
                    Some(ControlMessage::Shutdown) | None => break,
                },
                _ = ticker.tick(), if ticking => self.scheduled_tick(),
                _ = wait_for(backoff) => {
                    self.state.backoff_deadline = None;
                    Some(Trigger::Retry)
                }
            };

            if let Some(trigger) = trigger {
                if trigger != Trigger::Scheduled {
                    ticker.reset();
                }
                if self.run_cycle(trigger, &mut control).await == Flow::Shutdown {
                    break;
                }
            }
        }

        info!("🛑 Fetch orchestrator stopped");
    }

    fn scheduled_tick(&self) -> Option<Trigger> {
        if let Some(last) = self.state.last_fetch_started {
            let since = last.elapsed();
            if since < self.min_fetch_spacing {
                debug!(since_ms = since.as_millis() as u64, "tick inside minimum fetch spacing, skipping");
                return None;
            }
        }
        Some(Trigger::Scheduled)
    }

    fn pause(&mut self) {
        if self.state.paused {
            return;
        }
        self.state.paused = true;
        if self.state.backoff_deadline.take().is_some() {
            info!("Cancelled pending retry");
        }
        info!("⏸️ Fetching paused");
        self.publish(|s| s.phase = EnginePhase::Paused);
    }

    fn resume(&mut self) -> Option<Trigger> {
        if !self.state.paused && !self.state.halted {
            debug!("resume ignored, fetching is not paused");
            return None;
        }
        self.state.paused = false;
        self.state.halted = false;
        info!("▶️ Fetching resumed");
        Some(Trigger::Manual)
    }

    fn refresh(&mut self) -> Option<Trigger> {
        if self.state.paused {
            info!("Refresh ignored while paused");
            return None;
        }
        self.state.backoff_deadline = None;
        self.state.halted = false;
        Some(Trigger::Manual)
    }

    async fn run_cycle(&mut self, trigger: Trigger, control: &mut mpsc::UnboundedReceiver<ControlMessage>) -> Flow {
        if trigger != Trigger::Retry {
            self.state.attempt = 0;
        }
        let started = Instant::now();
        self.state.last_fetch_started = Some(started);
        self.metrics.cycle_started();
        self.publish(|s| s.phase = EnginePhase::Fetching);
        debug!(?trigger, attempt = self.state.attempt, "starting fetch cycle");

        let fetch = fetch_all(self.adapters.clone());
        tokio::pin!(fetch);

        let results = loop {
            tokio::select! {
                results = &mut fetch => break results,
                message = control.recv() => match message {
                    Some(ControlMessage::Pause) => {
                        self.state.paused = true;
                        info!("⏸️ Fetching paused, in-flight cycle will be discarded");
                        self.publish(|s| s.phase = EnginePhase::Paused);
                    }
                    Some(ControlMessage::Resume) => {
                        self.state.paused = false;
                        self.publish(|s| s.phase = EnginePhase::Fetching);
                    }
                    Some(ControlMessage::Refresh) => debug!("refresh ignored, cycle already in flight"),
                    Some(ControlMessage::Shutdown) | None => return Flow::Shutdown,
                }
            }
        };
        let elapsed = started.elapsed();

        if self.state.paused {
            self.metrics.cycle_discarded();
            info!("Discarded results of a cycle that finished while paused");
            self.publish(|s| s.phase = EnginePhase::Paused);
            return Flow::Continue;
        }

        match self.complete_cycle(results).await {
            Ok(records) => {
                self.state.attempt = 0;
                self.metrics.cycle_succeeded(elapsed);
                info!(records, elapsed_ms = elapsed.as_millis() as u64, "✅ Fetch cycle complete");
            }
            Err(error) => {
                self.metrics.cycle_failed(elapsed);
                self.handle_failure(error);
            }
        }
        Flow::Continue
    }

    /// Join adapter results into a new snapshot; returns the number of records published
    async fn complete_cycle(
        &mut self,
        results: Vec<(ExchangeId, Result<FetchOutcome, JoinError>)>,
    ) -> Result<usize, CycleError> {
        let mut outcomes = BTreeMap::new();
        let mut exchange_status = BTreeMap::new();
        let mut failure = None;

        for (exchange, result) in results {
            match result {
                Ok(outcome) => {
                    self.metrics.record_fetch(exchange, outcome.entries.len(), outcome.error);
                    exchange_status.insert(exchange, outcome.error);
                    if outcome.is_rate_limited() {
                        failure.get_or_insert(CycleError::RateLimited(exchange));
                    }
                    outcomes.insert(exchange, outcome);
                }
                Err(join_error) => {
                    error!(%exchange, error = %join_error, "Adapter task failed");
                    failure.get_or_insert(CycleError::AdapterPanicked(exchange, join_error.to_string()));
                }
            }
        }

        if let Some(error) = failure {
            self.publish(move |s| s.exchange_status = exchange_status);
            return Err(error);
        }

        let timestamp = Utc::now();
        let base = self.aggregator.base();
        let mut base_rates = Vec::new();
        let mut others = BTreeMap::new();
        let mut batch = Vec::new();
        let mut funding = Vec::new();

        for (exchange, outcome) in outcomes {
            let rates = self.ingest(exchange, outcome.entries, timestamp, &mut batch);
            funding.extend(rates.iter().map(|r| FundingRecord {
                exchange,
                symbol: r.symbol.clone(),
                rate: r.rate,
                timestamp,
            }));
            if exchange == base {
                base_rates = rates;
            } else {
                others.insert(exchange, rates);
            }
        }

        let records = self.aggregator.merge(&base_rates, &others, &self.tracker);
        let count = records.len();

        self.publish(move |s| {
            s.status = EngineStatus::Ready;
            s.phase = EnginePhase::Idle;
            s.records = records;
            s.exchange_status = exchange_status;
            s.cycle += 1;
            s.updated_at = Some(timestamp);
        });

        self.persist(batch, funding).await;
        Ok(count)
    }

    /// Normalize one exchange's entries and feed their spreads into the windows
    fn ingest(
        &mut self,
        exchange: ExchangeId,
        entries: Vec<RawFundingEntry>,
        timestamp: DateTime<Utc>,
        batch: &mut Vec<SpreadRecord>,
    ) -> Vec<FundingRate> {
        let mut rates = Vec::with_capacity(entries.len());
        let mut ingested = 0;
        let mut skipped = 0;

        for entry in entries {
            if !entry.rate.is_finite() {
                debug!(%exchange, symbol = %entry.symbol, "skipping entry with non-finite funding rate");
                skipped += 1;
                continue;
            }

            let symbol = self.normalizer.to_canonical(&entry.symbol, exchange);
            let spread = entry.spread_bps();

            match (entry.mark_price, entry.oracle_price, spread) {
                (Some(mark_price), Some(oracle_price), Some(spread_bps)) => {
                    if self.tracker.ingest(exchange, &symbol, spread_bps, timestamp) {
                        ingested += 1;
                        batch.push(SpreadRecord {
                            exchange,
                            symbol: symbol.clone(),
                            mark_price,
                            oracle_price,
                            spread_bps,
                            timestamp,
                        });
                    } else {
                        skipped += 1;
                    }
                }
                _ => {
                    debug!(%exchange, symbol = %entry.symbol, "skipping spread sample without usable prices");
                    skipped += 1;
                }
            }

            rates.push(FundingRate {
                symbol,
                rate: entry.rate,
                mark_price: entry.mark_price,
                oracle_price: entry.oracle_price,
                timestamp,
                context: entry.context,
            });
        }

        self.metrics.samples(ingested, skipped);
        rates
    }

    async fn persist(&self, spreads: Vec<SpreadRecord>, funding: Vec<FundingRecord>) {
        let Some(store) = &self.store else {
            return;
        };

        if !spreads.is_empty() {
            let count = spreads.len();
            match store.append(spreads).await {
                Ok(()) => debug!(count, "persisted spread samples"),
                Err(e) => warn!(error = %e, count, "failed to persist spread samples"),
            }
        }

        if !funding.is_empty() {
            let count = funding.len();
            match store.append_funding(funding).await {
                Ok(()) => debug!(count, "persisted funding rates"),
                Err(e) => warn!(error = %e, count, "failed to persist funding rates"),
            }
        }
    }

    fn handle_failure(&mut self, error: CycleError) {
        self.state.attempt += 1;
        let attempt = self.state.attempt;

        if attempt > self.max_retries {
            self.metrics.gave_up();
            self.state.halted = self.halt_on_give_up;
            error!(%error, attempts = attempt, halted = self.state.halted, "❌ Giving up after repeated fetch failures");
            let message = format!("giving up after {} attempts: {}", attempt, error);
            self.publish(move |s| {
                s.status = EngineStatus::Error(message);
                s.phase = EnginePhase::GaveUp;
            });
            return;
        }

        let delay = backoff_delay(self.initial_backoff, attempt);
        let retry_in_ms = delay.as_millis() as u64;
        self.state.backoff_deadline = Some(Instant::now() + delay);
        self.metrics.retry_scheduled();
        warn!(%error, attempt, max_retries = self.max_retries, retry_in_ms, "⚠️ Fetch cycle failed, backing off");

        let message = error.to_string();
        self.publish(move |s| {
            s.status = EngineStatus::Error(message);
            s.phase = EnginePhase::BackoffWait { attempt, retry_in_ms };
        });
    }

    /// Replace the published snapshot with an updated copy
    fn publish(&self, update: impl FnOnce(&mut EngineSnapshot)) {
        let mut next = EngineSnapshot::clone(&self.snapshot_tx.borrow());
        update(&mut next);
        self.snapshot_tx.send_replace(Arc::new(next));
    }
}

/// Run every adapter on its own task and wait for all of them
async fn fetch_all(adapters: Vec<Arc<dyn FundingAdapter>>) -> Vec<(ExchangeId, Result<FetchOutcome, JoinError>)> {
    let tasks = adapters.into_iter().map(|adapter| {
        let exchange = adapter.exchange();
        let task = tokio::spawn(async move { adapter.fetch_funding_and_spread().await });
        async move { (exchange, task.await) }
    });
    join_all(tasks).await
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
