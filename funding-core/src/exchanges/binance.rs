//! Binance USD-M futures funding adapter

use super::rest::{decode_each, fail_soft, parse_decimal, read_body, AdapterConfig, ExchangeResult};
use super::{ExchangeError, ExchangeId, FetchOutcome, FundingAdapter, RawFundingEntry};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const BINANCE_BASE_URL: &str = "https://fapi.binance.com";
const PREMIUM_INDEX_PATH: &str = "/fapi/v1/premiumIndex";

/// Binance error code for request weight exhaustion
const TOO_MANY_REQUESTS: i64 = -1003;

/// Premium index entry
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct BinancePremiumIndex {
    symbol: String,
    mark_price: Option<String>,
    index_price: Option<String>,
    last_funding_rate: Option<String>,
}

/// Error envelope returned in place of the payload
#[derive(Deserialize, Debug)]
struct BinanceErrorEnvelope {
    code: i64,
    msg: String,
}

pub struct BinanceFundingAdapter {
    client: Client,
    config: AdapterConfig,
}

impl BinanceFundingAdapter {
    pub fn new(client: Client, config: AdapterConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_premium_index(&self) -> ExchangeResult<Vec<RawFundingEntry>> {
        let response = self
            .client
            .get(self.config.endpoint(PREMIUM_INDEX_PATH))
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body = read_body(response).await?;
        self.parse_premium_index(&body)
    }

    fn parse_premium_index(&self, body: &str) -> ExchangeResult<Vec<RawFundingEntry>> {
        let value: serde_json::Value = serde_json::from_str(body)?;

        if value.is_object() {
            let envelope: BinanceErrorEnvelope = serde_json::from_value(value)?;
            return Err(if envelope.code == TOO_MANY_REQUESTS {
                ExchangeError::RateLimit(envelope.msg)
            } else {
                ExchangeError::Api {
                    code: envelope.code,
                    message: envelope.msg,
                }
            });
        }

        let items: Vec<serde_json::Value> = serde_json::from_value(value)?;
        let entries = decode_each::<BinancePremiumIndex>(self.exchange(), items)
            .into_iter()
            .filter_map(|item| {
                let Some(rate) = parse_decimal(item.last_funding_rate.as_deref()) else {
                    debug!(symbol = %item.symbol, "skipping Binance entry without funding rate");
                    return None;
                };
                Some(RawFundingEntry::new(
                    item.symbol,
                    self.config.hourly_rate(rate),
                    parse_decimal(item.mark_price.as_deref()),
                    parse_decimal(item.index_price.as_deref()),
                ))
            })
            .collect();

        Ok(entries)
    }
}

#[async_trait]
impl FundingAdapter for BinanceFundingAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn fetch_funding_and_spread(&self) -> FetchOutcome {
        fail_soft(self.exchange(), self.fetch_premium_index().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::FetchErrorKind;

    fn adapter() -> BinanceFundingAdapter {
        BinanceFundingAdapter::new(Client::new(), AdapterConfig::new(BINANCE_BASE_URL, 8))
    }

    #[test]
    fn test_parse_premium_index() {
        let body = r#"[
            {
                "symbol": "BTCUSDT",
                "markPrice": "50010.00000000",
                "indexPrice": "50000.00000000",
                "estimatedSettlePrice": "50003.1",
                "lastFundingRate": "0.00080000",
                "interestRate": "0.00010000",
                "nextFundingTime": 1597392000000,
                "time": 1597370495002
            },
            {
                "symbol": "1000PEPEUSDT",
                "markPrice": "0.0123",
                "indexPrice": "",
                "lastFundingRate": "-0.00016000"
            }
        ]"#;

        let entries = adapter().parse_premium_index(body).unwrap();
        assert_eq!(entries.len(), 2);

        let btc = &entries[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert!((btc.rate - 0.0001).abs() < 1e-12);
        assert_eq!(btc.mark_price, Some(50010.0));
        assert_eq!(btc.oracle_price, Some(50000.0));
        assert!((btc.spread_bps().unwrap() - 2.0).abs() < 1e-9);

        let pepe = &entries[1];
        assert!((pepe.rate + 0.00002).abs() < 1e-12);
        assert_eq!(pepe.oracle_price, None);
        assert_eq!(pepe.spread_bps(), None);
    }

    #[test]
    fn test_entries_without_rate_are_skipped() {
        let body = r#"[
            {"symbol": "BTCUSDT", "markPrice": "1", "indexPrice": "1", "lastFundingRate": ""},
            {"symbol": "ETHUSDT", "markPrice": "1", "indexPrice": "1"}
        ]"#;
        assert!(adapter().parse_premium_index(body).unwrap().is_empty());
    }

    #[test]
    fn test_error_envelope() {
        let throttled = adapter()
            .parse_premium_index(r#"{"code": -1003, "msg": "Too many requests"}"#)
            .unwrap_err();
        assert_eq!(throttled.kind(), FetchErrorKind::RateLimited);

        let rejected = adapter()
            .parse_premium_index(r#"{"code": -1121, "msg": "Invalid symbol."}"#)
            .unwrap_err();
        assert_eq!(rejected.kind(), FetchErrorKind::ExchangeReported);
    }

    #[test]
    fn test_malformed_payload() {
        let err = adapter().parse_premium_index("<html>502</html>").unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);

        let err = adapter().parse_premium_index(r#""maintenance""#).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }

    #[test]
    fn test_bad_rows_do_not_drop_good_rows() {
        let body = r#"[
            {"symbol": "BTCUSDT", "markPrice": "50010", "indexPrice": "50000", "lastFundingRate": "0.0008"},
            {"symbol": "ETHUSDT", "markPrice": 3000.5, "indexPrice": "3000", "lastFundingRate": "0.0008"},
            {"markPrice": "1", "lastFundingRate": "0.0008"},
            null
        ]"#;
        let entries = adapter().parse_premium_index(body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "BTCUSDT");
    }
}
