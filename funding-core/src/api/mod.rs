//! HTTP API
//!
//! Serves the latest combined funding snapshot, windowed spread and funding
//! history from the store, engine metrics, and pause/resume/refresh control.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::engine::OrchestratorHandle;
use crate::exchanges::{ExchangeId, Symbol};
use crate::metrics::EngineMetrics;
use crate::store::{summarize, SpreadQuery, SpreadStore};

const DEFAULT_SPREAD_WINDOW_SECS: u64 = 30;

/// API error types
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl warp::reject::Reject for ApiError {}

pub struct FundingApiServer {
    handle: OrchestratorHandle,
    store: Arc<dyn SpreadStore>,
    metrics: Arc<EngineMetrics>,
    bind: SocketAddr,
}

impl FundingApiServer {
    pub fn new(
        handle: OrchestratorHandle,
        store: Arc<dyn SpreadStore>,
        metrics: Arc<EngineMetrics>,
        bind: SocketAddr,
    ) -> Self {
        Self {
            handle,
            store,
            metrics,
            bind,
        }
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
        let health = warp::path("health").and(warp::path::end()).and(warp::get()).map(|| {
            warp::reply::json(&json!({
                "status": "ok",
                "service": "funding-monitor",
                "timestamp": chrono::Utc::now()
            }))
        });

        // Windowed spread averages per symbol and exchange
        let spreads = warp::path!("api" / "spreads")
            .and(warp::get())
            .and(warp::query::<SpreadsParams>())
            .and(with_store(self.store.clone()))
            .and_then(get_spreads);

        let funding_history = warp::path!("api" / "v1" / "funding" / "history")
            .and(warp::get())
            .and(warp::query::<SpreadsParams>())
            .and(with_store(self.store.clone()))
            .and_then(get_funding_history);

        let funding = warp::path!("api" / "v1" / "funding")
            .and(warp::get())
            .and(with_handle(self.handle.clone()))
            .and_then(get_funding);

        let metrics = warp::path!("api" / "v1" / "metrics")
            .and(warp::get())
            .and(with_metrics(self.metrics.clone()))
            .and_then(get_metrics);

        let control = warp::path!("api" / "v1" / "control" / String)
            .and(warp::post())
            .and(with_handle(self.handle.clone()))
            .and_then(post_control);

        let cors = warp::cors()
            .allow_any_origin()
            .allow_headers(vec!["content-type"])
            .allow_methods(vec!["GET", "POST", "OPTIONS"]);

        health
            .or(spreads)
            .or(funding_history)
            .or(funding)
            .or(metrics)
            .or(control)
            .with(cors)
            .recover(handle_rejection)
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), warp::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let routes = self.routes();
        let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(self.bind, shutdown)?;
        tracing::info!("🌐 Funding API listening on http://{}", addr);
        server.await;
        tracing::info!("Funding API stopped");
        Ok(())
    }
}

fn with_store(
    store: Arc<dyn SpreadStore>,
) -> impl Filter<Extract = (Arc<dyn SpreadStore>,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

fn with_handle(
    handle: OrchestratorHandle,
) -> impl Filter<Extract = (OrchestratorHandle,), Error = Infallible> + Clone {
    warp::any().map(move || handle.clone())
}

fn with_metrics(
    metrics: Arc<EngineMetrics>,
) -> impl Filter<Extract = (Arc<EngineMetrics>,), Error = Infallible> + Clone {
    warp::any().map(move || metrics.clone())
}

#[derive(Debug, Deserialize)]
struct SpreadsParams {
    window_secs: Option<u64>,
    symbol: Option<String>,
    exchange: Option<String>,
}

impl SpreadsParams {
    fn into_query(self) -> Result<SpreadQuery, ApiError> {
        let window_secs = self.window_secs.unwrap_or(DEFAULT_SPREAD_WINDOW_SECS);
        if window_secs == 0 {
            return Err(ApiError::bad_request("window_secs must be greater than zero"));
        }

        let mut query = SpreadQuery::within(Duration::from_secs(window_secs));
        if let Some(symbol) = self.symbol.filter(|s| !s.trim().is_empty()) {
            query = query.symbol(Symbol::new(symbol.trim()));
        }
        if let Some(exchange) = self.exchange {
            let exchange: ExchangeId = exchange.parse().map_err(ApiError::bad_request)?;
            query = query.exchange(exchange);
        }
        Ok(query)
    }
}

async fn get_spreads(params: SpreadsParams, store: Arc<dyn SpreadStore>) -> Result<impl Reply, Rejection> {
    let query = params.into_query().map_err(warp::reject::custom)?;
    let records = store
        .recent(&query)
        .await
        .map_err(|e| warp::reject::custom(ApiError::unavailable(e.to_string())))?;

    Ok(warp::reply::json(&summarize(&records)))
}

async fn get_funding_history(params: SpreadsParams, store: Arc<dyn SpreadStore>) -> Result<impl Reply, Rejection> {
    let query = params.into_query().map_err(warp::reject::custom)?;
    let records = store
        .recent_funding(&query)
        .await
        .map_err(|e| warp::reject::custom(ApiError::unavailable(e.to_string())))?;

    Ok(warp::reply::json(&records))
}

async fn get_funding(handle: OrchestratorHandle) -> Result<impl Reply, Rejection> {
    let snapshot = handle.latest();
    Ok(warp::reply::json(snapshot.as_ref()))
}

async fn get_metrics(metrics: Arc<EngineMetrics>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&metrics.snapshot()))
}

async fn post_control(action: String, handle: OrchestratorHandle) -> Result<impl Reply, Rejection> {
    let accepted = match action.as_str() {
        "pause" => handle.pause(),
        "resume" => handle.resume(),
        "refresh" => handle.refresh(),
        other => {
            return Err(warp::reject::custom(ApiError::bad_request(format!(
                "Unknown control action: {}",
                other
            ))))
        }
    };

    if !accepted {
        return Err(warp::reject::custom(ApiError::unavailable("Engine is not running")));
    }

    tracing::info!(%action, "Control request accepted");
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "action": action, "accepted": true })),
        StatusCode::ACCEPTED,
    ))
}

/// Handle API errors
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let code;
    let message;

    if err.is_not_found() {
        code = StatusCode::NOT_FOUND;
        message = "Endpoint not found".to_string();
    } else if let Some(api_error) = err.find::<ApiError>() {
        code = api_error.status;
        message = api_error.message.clone();
    } else if let Some(invalid) = err.find::<warp::reject::InvalidQuery>() {
        code = StatusCode::BAD_REQUEST;
        message = invalid.to_string();
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        code = StatusCode::METHOD_NOT_ALLOWED;
        message = "Method not allowed".to_string();
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        code = StatusCode::INTERNAL_SERVER_ERROR;
        message = "Internal server error".to_string();
    }

    let json = warp::reply::json(&json!({
        "error": message,
        "code": code.as_u16()
    }));

    Ok(warp::reply::with_status(json, code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::FetchOrchestrator;
    use crate::store::{FundingRecord, InMemorySpreadStore, SpreadRecord};
    use chrono::Utc;
    use serde_json::Value;

    fn server(store: Arc<InMemorySpreadStore>) -> (FundingApiServer, OrchestratorHandle) {
        let metrics = Arc::new(EngineMetrics::new());
        let (handle, _task) = FetchOrchestrator::new(&EngineConfig::default(), Vec::new())
            .with_metrics(metrics.clone())
            .spawn();
        let server = FundingApiServer::new(handle.clone(), store, metrics, ([127, 0, 0, 1], 0).into());
        (server, handle)
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    fn spread(exchange: ExchangeId, symbol: &str, spread_bps: f64) -> SpreadRecord {
        SpreadRecord {
            exchange,
            symbol: Symbol::new(symbol),
            mark_price: 100.0,
            oracle_price: 99.9,
            spread_bps,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _handle) = server(Arc::new(InMemorySpreadStore::new(10)));
        let response = warp::test::request().path("/health").reply(&server.routes()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response.body())["status"], "ok");
    }

    #[tokio::test]
    async fn test_spreads_summary() {
        let store = Arc::new(InMemorySpreadStore::new(10));
        store
            .append(vec![
                spread(ExchangeId::Binance, "BTC", 10.0),
                spread(ExchangeId::Binance, "BTC", 20.0),
                spread(ExchangeId::Bybit, "ETH", 5.0),
            ])
            .await
            .unwrap();
        let (server, _handle) = server(store);
        let routes = server.routes();

        let response = warp::test::request().path("/api/spreads").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.body());
        assert_eq!(body["BTC"]["binance"]["average"], 15.0);
        assert_eq!(body["BTC"]["binance"]["current"], 20.0);
        assert_eq!(body["ETH"]["bybit"]["markPrice"], 100.0);

        let response = warp::test::request()
            .path("/api/spreads?window_secs=60&exchange=bybit")
            .reply(&routes)
            .await;
        let body = body_json(response.body());
        assert!(body.get("BTC").is_none());
        assert!(body.get("ETH").is_some());
    }

    #[tokio::test]
    async fn test_funding_history() {
        let store = Arc::new(InMemorySpreadStore::new(10));
        let rate = |exchange, symbol: &str, rate| FundingRecord {
            exchange,
            symbol: Symbol::new(symbol),
            rate,
            timestamp: Utc::now(),
        };
        store
            .append_funding(vec![
                rate(ExchangeId::Hyperliquid, "BTC", 0.0000125),
                rate(ExchangeId::Binance, "BTC", 0.0001),
                rate(ExchangeId::Binance, "ETH", 0.00005),
            ])
            .await
            .unwrap();
        let (server, _handle) = server(store);
        let routes = server.routes();

        let response = warp::test::request()
            .path("/api/v1/funding/history?window_secs=60&symbol=BTC")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.body());
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[0]["exchange"], "hyperliquid");

        let response = warp::test::request()
            .path("/api/v1/funding/history?exchange=okx")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_spread_queries() {
        let (server, _handle) = server(Arc::new(InMemorySpreadStore::new(10)));
        let routes = server.routes();

        let response = warp::test::request()
            .path("/api/spreads?exchange=kraken")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response.body())["code"], 400);

        let response = warp::test::request()
            .path("/api/spreads?window_secs=0")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request()
            .path("/api/spreads?window_secs=soon")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_funding_snapshot_and_metrics() {
        let (server, _handle) = server(Arc::new(InMemorySpreadStore::new(10)));
        let routes = server.routes();

        let response = warp::test::request().path("/api/v1/funding").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.body());
        assert!(body["records"].is_array());
        assert!(body["status"]["state"].is_string());

        let response = warp::test::request().path("/api/v1/metrics").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response.body())["cycles"]["cycles_started"].is_number());
    }

    #[tokio::test]
    async fn test_control_routes() {
        let (server, handle) = server(Arc::new(InMemorySpreadStore::new(10)));
        let routes = server.routes();

        let response = warp::test::request()
            .method("POST")
            .path("/api/v1/control/pause")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = warp::test::request()
            .method("POST")
            .path("/api/v1/control/explode")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let response = warp::test::request()
            .method("POST")
            .path("/api/v1/control/refresh")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (server, _handle) = server(Arc::new(InMemorySpreadStore::new(10)));
        let response = warp::test::request().path("/api/v2/nothing").reply(&server.routes()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response.body())["error"], "Endpoint not found");
    }
}
