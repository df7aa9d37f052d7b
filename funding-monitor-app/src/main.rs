//! Funding Monitor Application
//!
//! Runs the funding aggregation engine against the live exchange APIs and
//! serves its output over HTTP until interrupted.

use anyhow::Result;
use std::time::Duration;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use funding_core::{EngineConfig, EnginePhase, EngineSnapshot, EngineStatus, FundingMonitor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting funding monitor");

    let config = EngineConfig::from_env()?;
    info!(
        poll_secs = config.poll_interval.as_secs(),
        retention_secs = config.retention_window.as_secs(),
        api = %config.api_bind,
        "Configuration loaded"
    );

    let monitor = FundingMonitor::new(config)?;
    let (handle, engine_task) = monitor.start();
    info!("✅ Fetch orchestrator started");

    let (api_shutdown_tx, api_shutdown_rx) = oneshot::channel::<()>();
    let api = monitor.api_server(handle.clone());
    let api_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = api_shutdown_rx.await;
        };
        if let Err(e) = api.run_until(shutdown).await {
            warn!(error = %e, "API server failed to start");
        }
    });

    let pruner = monitor.spawn_pruner();

    // Log a one-line summary whenever a new snapshot lands
    let mut snapshots = handle.subscribe();
    let summary_task = tokio::spawn(async move {
        let mut reporter = SnapshotReporter::default();
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            reporter.report(&snapshot);
        }
    });

    info!("📊 Monitor is running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Shutdown signal received...");
        }
        _ = engine_task => {
            warn!("Fetch orchestrator exited unexpectedly");
        }
    }

    // Clean shutdown
    handle.shutdown();
    let _ = api_shutdown_tx.send(());
    pruner.abort();
    summary_task.abort();
    if tokio::time::timeout(Duration::from_secs(5), api_task).await.is_err() {
        warn!("API server did not stop within 5s");
    }

    info!("✅ Funding monitor shutdown complete");
    Ok(())
}

/// Logs new cycles and error transitions, once each
#[derive(Default)]
struct SnapshotReporter {
    last_cycle: u64,
    last_error: Option<(String, EnginePhase)>,
}

impl SnapshotReporter {
    /// Returns whether the snapshot produced a log line
    fn report(&mut self, snapshot: &EngineSnapshot) -> bool {
        match &snapshot.status {
            EngineStatus::Ready if snapshot.cycle != self.last_cycle => {
                self.last_cycle = snapshot.cycle;
                self.last_error = None;
                let degraded = snapshot.degraded_exchanges();
                if degraded.is_empty() {
                    info!(cycle = snapshot.cycle, symbols = snapshot.records.len(), "📊 Snapshot updated");
                } else {
                    warn!(cycle = snapshot.cycle, symbols = snapshot.records.len(), ?degraded, "📊 Snapshot updated with degraded exchanges");
                }
                true
            }
            EngineStatus::Error(message) => {
                let current = (message.clone(), snapshot.phase.clone());
                if self.last_error.as_ref() == Some(&current) {
                    return false;
                }
                warn!(phase = ?snapshot.phase, "Engine error: {}", message);
                self.last_error = Some(current);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(message: &str, phase: EnginePhase) -> EngineSnapshot {
        EngineSnapshot {
            status: EngineStatus::Error(message.to_string()),
            phase,
            ..EngineSnapshot::loading()
        }
    }

    #[test]
    fn test_error_logged_once_per_transition() {
        let mut reporter = SnapshotReporter::default();
        let fetching = failing("rate limited by binance", EnginePhase::Fetching);
        let backoff = failing(
            "rate limited by binance",
            EnginePhase::BackoffWait {
                attempt: 1,
                retry_in_ms: 5_000,
            },
        );

        assert!(reporter.report(&fetching));
        assert!(!reporter.report(&fetching));
        assert!(reporter.report(&backoff));
        assert!(!reporter.report(&backoff));
        assert!(reporter.report(&failing("giving up", EnginePhase::GaveUp)));
    }

    #[test]
    fn test_each_cycle_logged_once() {
        let mut reporter = SnapshotReporter::default();
        let ready = EngineSnapshot {
            status: EngineStatus::Ready,
            cycle: 1,
            ..EngineSnapshot::loading()
        };

        assert!(reporter.report(&ready));
        assert!(!reporter.report(&ready));
        assert!(!reporter.report(&EngineSnapshot::loading()));
    }
}
