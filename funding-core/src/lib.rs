//! Funding Rate Aggregation Library
//!
//! Polls perpetual-futures funding rates and mark/oracle prices from
//! Hyperliquid, Binance and Bybit, keeps rolling spread windows per
//! (exchange, symbol), and publishes one combined record per instrument.
//! Can be embedded as a library or run through the `funding-monitor` binary.

pub mod api;
pub mod config;
pub mod engine;
pub mod exchanges;
pub mod market_data;
pub mod metrics;
pub mod store;

// Re-export main types for easy access
pub use api::FundingApiServer;
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    CombinedRecord, CycleError, EnginePhase, EngineSnapshot, EngineStatus, ExchangeQuote, FetchOrchestrator,
    OrchestratorHandle,
};
pub use exchanges::{ExchangeId, FetchErrorKind, FetchOutcome, FundingAdapter, FundingRate, Symbol};
pub use market_data::{SpreadStats, SpreadWindowTracker, SymbolNormalizer};
pub use metrics::EngineMetrics;
pub use store::{FundingRecord, InMemorySpreadStore, PruneReport, SpreadQuery, SpreadRecord, SpreadStore};

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

use exchanges::{BinanceFundingAdapter, BybitFundingAdapter, HyperliquidFundingAdapter};

/// Fully wired monitor: live adapters, in-memory store, metrics and API
pub struct FundingMonitor {
    config: EngineConfig,
    store: Arc<InMemorySpreadStore>,
    metrics: Arc<EngineMetrics>,
    adapters: Vec<Arc<dyn FundingAdapter>>,
}

impl FundingMonitor {
    /// Validate the configuration and build one HTTP adapter per exchange
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("funding-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let adapters: Vec<Arc<dyn FundingAdapter>> = vec![
            Arc::new(HyperliquidFundingAdapter::new(client.clone(), config.hyperliquid.clone())),
            Arc::new(BinanceFundingAdapter::new(client.clone(), config.binance.clone())),
            Arc::new(BybitFundingAdapter::new(client, config.bybit.clone())),
        ];

        Ok(Self {
            store: Arc::new(InMemorySpreadStore::new(config.store_capacity)),
            metrics: Arc::new(EngineMetrics::new()),
            adapters,
            config,
        })
    }

    /// Start fetching; the returned handle controls and observes the engine
    pub fn start(&self) -> (OrchestratorHandle, JoinHandle<()>) {
        FetchOrchestrator::new(&self.config, self.adapters.clone())
            .with_store(self.store.clone())
            .with_metrics(self.metrics.clone())
            .spawn()
    }

    pub fn api_server(&self, handle: OrchestratorHandle) -> FundingApiServer {
        FundingApiServer::new(handle, self.store.clone(), self.metrics.clone(), self.config.api_bind)
    }

    /// Delete stored spreads and funding rates older than the retention period, now and then every prune interval
    pub fn spawn_pruner(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let retention_days = self.config.retention_days;
        let mut interval = tokio::time::interval(self.config.prune_interval);

        tokio::spawn(async move {
            loop {
                interval.tick().await;
                match store.prune(retention_days).await {
                    Ok(report) => tracing::info!(
                        spreads = report.spreads,
                        funding_rates = report.funding_rates,
                        retention_days,
                        "🧹 Pruned stored history"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Spread pruning failed"),
                }
            }
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<InMemorySpreadStore> {
        &self.store
    }
}
