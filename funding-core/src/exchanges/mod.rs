//! Exchange connectivity modules

pub mod binance;
pub mod bybit;
pub mod errors;
pub mod hyperliquid;
pub mod rest;
pub mod types;

pub use binance::{BinanceFundingAdapter, BINANCE_BASE_URL};
pub use bybit::{BybitFundingAdapter, BYBIT_BASE_URL};
pub use errors::ExchangeError;
pub use hyperliquid::{HyperliquidFundingAdapter, HYPERLIQUID_BASE_URL};
pub use rest::{parse_decimal, AdapterConfig, ExchangeResult};
pub use types::{
    spread_bps, ExchangeId, FetchErrorKind, FetchOutcome, FundingRate, MarketContext, RawFundingEntry, Symbol,
};

use async_trait::async_trait;

/// One exchange's funding and mark/oracle source.
///
/// Implementations perform a single request per call and never retry;
/// failures are reported through [`FetchOutcome::error`] with empty data.
#[async_trait]
pub trait FundingAdapter: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    async fn fetch_funding_and_spread(&self) -> FetchOutcome;
}
