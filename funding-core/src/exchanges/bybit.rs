//! Bybit linear perpetual funding adapter

use super::rest::{decode_each, fail_soft, parse_decimal, read_body, AdapterConfig, ExchangeResult};
use super::{ExchangeError, ExchangeId, FetchOutcome, FundingAdapter, RawFundingEntry};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const BYBIT_BASE_URL: &str = "https://api.bybit.com";
const TICKERS_PATH: &str = "/v5/market/tickers";

/// retCodes Bybit uses for request throttling
const RATE_LIMIT_CODES: [i64; 2] = [10006, 10018];

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BybitResponse {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<BybitTickerList>,
}

#[derive(Deserialize, Debug)]
struct BybitTickerList {
    #[serde(default)]
    list: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct BybitTicker {
    symbol: String,
    mark_price: Option<String>,
    index_price: Option<String>,
    funding_rate: Option<String>,
}

pub struct BybitFundingAdapter {
    client: Client,
    config: AdapterConfig,
}

impl BybitFundingAdapter {
    pub fn new(client: Client, config: AdapterConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_tickers(&self) -> ExchangeResult<Vec<RawFundingEntry>> {
        let response = self
            .client
            .get(self.config.endpoint(TICKERS_PATH))
            .query(&[("category", "linear")])
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body = read_body(response).await?;
        self.parse_tickers(&body)
    }

    fn parse_tickers(&self, body: &str) -> ExchangeResult<Vec<RawFundingEntry>> {
        let response: BybitResponse = serde_json::from_str(body)?;

        if response.ret_code != 0 {
            return Err(if RATE_LIMIT_CODES.contains(&response.ret_code) {
                ExchangeError::RateLimit(response.ret_msg)
            } else {
                ExchangeError::Api {
                    code: response.ret_code,
                    message: response.ret_msg,
                }
            });
        }

        let list = response
            .result
            .ok_or_else(|| ExchangeError::Parse("missing result in Bybit response".to_string()))?
            .list;

        let entries = decode_each::<BybitTicker>(self.exchange(), list)
            .into_iter()
            .filter_map(|ticker| {
                // Dated futures share the endpoint but carry no funding
                let Some(rate) = parse_decimal(ticker.funding_rate.as_deref()) else {
                    debug!(symbol = %ticker.symbol, "skipping Bybit ticker without funding rate");
                    return None;
                };
                Some(RawFundingEntry::new(
                    ticker.symbol,
                    self.config.hourly_rate(rate),
                    parse_decimal(ticker.mark_price.as_deref()),
                    parse_decimal(ticker.index_price.as_deref()),
                ))
            })
            .collect();

        Ok(entries)
    }
}

#[async_trait]
impl FundingAdapter for BybitFundingAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn fetch_funding_and_spread(&self) -> FetchOutcome {
        fail_soft(self.exchange(), self.fetch_tickers().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::FetchErrorKind;

    fn adapter() -> BybitFundingAdapter {
        BybitFundingAdapter::new(Client::new(), AdapterConfig::new(BYBIT_BASE_URL, 8))
    }

    #[test]
    fn test_parse_tickers() {
        let body = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "linear",
                "list": [
                    {
                        "symbol": "BTCUSDT",
                        "lastPrice": "50012.00",
                        "indexPrice": "50000.00",
                        "markPrice": "50010.00",
                        "fundingRate": "0.0016",
                        "nextFundingTime": "1673280000000"
                    },
                    {
                        "symbol": "BTC-27DEC24",
                        "indexPrice": "50000.00",
                        "markPrice": "51000.00",
                        "fundingRate": ""
                    }
                ]
            },
            "time": 1672376496682
        }"#;

        let entries = adapter().parse_tickers(body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "BTCUSDT");
        assert!((entries[0].rate - 0.0002).abs() < 1e-12);
        assert_eq!(entries[0].mark_price, Some(50010.0));
        assert_eq!(entries[0].oracle_price, Some(50000.0));
    }

    #[test]
    fn test_malformed_ticker_is_skipped() {
        let body = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "list": [
                    {"symbol": "BTCUSDT", "indexPrice": "50000", "markPrice": "50010", "fundingRate": "0.0016"},
                    {"indexPrice": "3000", "markPrice": "3001", "fundingRate": "0.0008"},
                    {"symbol": "SOLUSDT", "indexPrice": 100, "markPrice": "100", "fundingRate": "0.0008"}
                ]
            }
        }"#;

        let entries = adapter().parse_tickers(body).unwrap();
        let symbols: Vec<_> = entries.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, ["BTCUSDT"]);
    }

    #[test]
    fn test_ret_code_envelope() {
        let throttled = adapter()
            .parse_tickers(r#"{"retCode": 10006, "retMsg": "Too many visits!", "result": {}}"#)
            .unwrap_err();
        assert_eq!(throttled.kind(), FetchErrorKind::RateLimited);

        let rejected = adapter()
            .parse_tickers(r#"{"retCode": 10001, "retMsg": "params error", "result": {}}"#)
            .unwrap_err();
        assert_eq!(rejected.kind(), FetchErrorKind::ExchangeReported);
    }

    #[test]
    fn test_missing_result_is_malformed() {
        let err = adapter().parse_tickers(r#"{"retCode": 0, "retMsg": "OK"}"#).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }
}
