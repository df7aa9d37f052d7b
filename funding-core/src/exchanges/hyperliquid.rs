//! Hyperliquid perpetuals funding adapter
//!
//! Hyperliquid is the base exchange: its universe defines the set of
//! combined records, and its asset contexts supply the auxiliary market
//! fields (volume, open interest, premium, impact prices).

use super::rest::{fail_soft, parse_decimal, read_body, AdapterConfig, ExchangeResult};
use super::{ExchangeError, ExchangeId, FetchOutcome, FundingAdapter, MarketContext, RawFundingEntry};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const HYPERLIQUID_BASE_URL: &str = "https://api.hyperliquid.xyz";
const INFO_PATH: &str = "/info";

#[derive(Deserialize, Debug)]
struct HyperliquidMeta {
    universe: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct HyperliquidAsset {
    name: String,
    #[serde(default)]
    is_delisted: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct HyperliquidAssetCtx {
    funding: Option<String>,
    open_interest: Option<String>,
    prev_day_px: Option<String>,
    day_ntl_vlm: Option<String>,
    premium: Option<String>,
    oracle_px: Option<String>,
    mark_px: Option<String>,
    impact_pxs: Option<Vec<String>>,
}

impl HyperliquidAssetCtx {
    fn context(&self) -> MarketContext {
        let impact = self.impact_pxs.as_deref().unwrap_or_default();
        MarketContext {
            day_volume: parse_decimal(self.day_ntl_vlm.as_deref()),
            open_interest: parse_decimal(self.open_interest.as_deref()),
            mark_price: parse_decimal(self.mark_px.as_deref()),
            oracle_price: parse_decimal(self.oracle_px.as_deref()),
            premium: parse_decimal(self.premium.as_deref()),
            prev_day_price: parse_decimal(self.prev_day_px.as_deref()),
            impact_prices: (
                parse_decimal(impact.first().map(String::as_str)),
                parse_decimal(impact.get(1).map(String::as_str)),
            ),
        }
    }
}

pub struct HyperliquidFundingAdapter {
    client: Client,
    config: AdapterConfig,
}

impl HyperliquidFundingAdapter {
    pub fn new(client: Client, config: AdapterConfig) -> Self {
        Self { client, config }
    }

    async fn fetch_meta_and_asset_ctxs(&self) -> ExchangeResult<Vec<RawFundingEntry>> {
        let response = self
            .client
            .post(self.config.endpoint(INFO_PATH))
            .json(&json!({ "type": "metaAndAssetCtxs" }))
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body = read_body(response).await?;
        self.parse_meta_and_asset_ctxs(&body)
    }

    fn parse_meta_and_asset_ctxs(&self, body: &str) -> ExchangeResult<Vec<RawFundingEntry>> {
        let (meta, ctxs): (HyperliquidMeta, Vec<serde_json::Value>) = serde_json::from_str(body)?;

        // Contexts are positional: entry i describes universe asset i
        if meta.universe.len() != ctxs.len() {
            return Err(ExchangeError::Parse(format!(
                "universe has {} assets but {} contexts",
                meta.universe.len(),
                ctxs.len()
            )));
        }

        let entries = meta
            .universe
            .into_iter()
            .zip(ctxs)
            .enumerate()
            .filter_map(|(index, (asset, ctx))| {
                let decoded = serde_json::from_value::<HyperliquidAsset>(asset)
                    .and_then(|asset| Ok((asset, serde_json::from_value::<HyperliquidAssetCtx>(ctx)?)));
                match decoded {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        debug!(index, error = %e, "skipping malformed Hyperliquid asset");
                        None
                    }
                }
            })
            .filter(|(asset, _)| !asset.is_delisted)
            .filter_map(|(asset, ctx)| {
                let Some(rate) = parse_decimal(ctx.funding.as_deref()) else {
                    debug!(symbol = %asset.name, "skipping Hyperliquid asset without funding");
                    return None;
                };
                let context = ctx.context();
                Some(
                    RawFundingEntry::new(
                        asset.name,
                        self.config.hourly_rate(rate),
                        context.mark_price,
                        context.oracle_price,
                    )
                    .with_context(context),
                )
            })
            .collect();

        Ok(entries)
    }
}

#[async_trait]
impl FundingAdapter for HyperliquidFundingAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Hyperliquid
    }

    async fn fetch_funding_and_spread(&self) -> FetchOutcome {
        fail_soft(self.exchange(), self.fetch_meta_and_asset_ctxs().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::FetchErrorKind;

    fn adapter() -> HyperliquidFundingAdapter {
        HyperliquidFundingAdapter::new(Client::new(), AdapterConfig::new(HYPERLIQUID_BASE_URL, 1))
    }

    const META_AND_CTXS: &str = r#"[
        {
            "universe": [
                {"name": "BTC", "szDecimals": 5, "maxLeverage": 50},
                {"name": "kPEPE", "szDecimals": 0, "maxLeverage": 10},
                {"name": "OLD", "szDecimals": 1, "maxLeverage": 3, "isDelisted": true}
            ]
        },
        [
            {
                "funding": "0.0000125",
                "openInterest": "12000.5",
                "prevDayPx": "49000.0",
                "dayNtlVlm": "1500000000.0",
                "premium": "0.0002",
                "oraclePx": "49990.0",
                "markPx": "50000.0",
                "midPx": "50001.0",
                "impactPxs": ["49999.0", "50002.0"]
            },
            {
                "funding": "-0.00003",
                "openInterest": "500.0",
                "prevDayPx": "0.012",
                "dayNtlVlm": "250000.0",
                "premium": null,
                "oraclePx": "0.0120",
                "markPx": "0.0121",
                "impactPxs": null
            },
            {
                "funding": "0.0",
                "oraclePx": "1.0",
                "markPx": "1.0"
            }
        ]
    ]"#;

    #[test]
    fn test_parse_meta_and_asset_ctxs() {
        let entries = adapter().parse_meta_and_asset_ctxs(META_AND_CTXS).unwrap();
        assert_eq!(entries.len(), 2);

        let btc = &entries[0];
        assert_eq!(btc.symbol, "BTC");
        assert_eq!(btc.rate, 0.0000125);
        assert_eq!(btc.mark_price, Some(50000.0));
        assert_eq!(btc.oracle_price, Some(49990.0));

        let context = btc.context.as_ref().unwrap();
        assert_eq!(context.day_volume, Some(1_500_000_000.0));
        assert_eq!(context.open_interest, Some(12000.5));
        assert_eq!(context.premium, Some(0.0002));
        assert_eq!(context.prev_day_price, Some(49000.0));
        assert_eq!(context.impact_prices, (Some(49999.0), Some(50002.0)));
    }

    #[test]
    fn test_null_context_fields_are_absent() {
        let entries = adapter().parse_meta_and_asset_ctxs(META_AND_CTXS).unwrap();
        let pepe = &entries[1];
        assert_eq!(pepe.symbol, "kPEPE");

        let context = pepe.context.as_ref().unwrap();
        assert_eq!(context.premium, None);
        assert_eq!(context.impact_prices, (None, None));
    }

    #[test]
    fn test_malformed_asset_keeps_its_neighbours() {
        let body = r#"[
            {"universe": [{"name": "BTC"}, {"name": "ETH"}, {"szDecimals": 2}]},
            [
                {"funding": "0.0001", "oraclePx": "50000.0", "markPx": "50010.0"},
                null,
                {"funding": "0.0002"}
            ]
        ]"#;

        let entries = adapter().parse_meta_and_asset_ctxs(body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "BTC");
        assert_eq!(entries[0].mark_price, Some(50010.0));
    }

    #[test]
    fn test_mismatched_universe_is_malformed() {
        let body = r#"[{"universe": [{"name": "BTC"}, {"name": "ETH"}]}, [{"funding": "0.0001"}]]"#;
        let err = adapter().parse_meta_and_asset_ctxs(body).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);

        let err = adapter().parse_meta_and_asset_ctxs(r#"{"error": "bad"}"#).unwrap_err();
        assert_eq!(err.kind(), FetchErrorKind::Malformed);
    }
}
