//! Exchange data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical, exchange-agnostic instrument identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Hyperliquid,
    Binance,
    Bybit,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 3] = [ExchangeId::Hyperliquid, ExchangeId::Binance, ExchangeId::Bybit];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Hyperliquid => "hyperliquid",
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeId::Hyperliquid => write!(f, "Hyperliquid"),
            ExchangeId::Binance => write!(f, "Binance"),
            ExchangeId::Bybit => write!(f, "Bybit"),
        }
    }
}

impl std::str::FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hyperliquid" => Ok(ExchangeId::Hyperliquid),
            "binance" => Ok(ExchangeId::Binance),
            "bybit" => Ok(ExchangeId::Bybit),
            other => Err(format!("unknown exchange: {}", other)),
        }
    }
}

/// Per-asset context reported by the base exchange
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketContext {
    pub day_volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub mark_price: Option<f64>,
    pub oracle_price: Option<f64>,
    pub premium: Option<f64>,
    pub prev_day_price: Option<f64>,
    pub impact_prices: (Option<f64>, Option<f64>),
}

/// One instrument as returned by an adapter, still in the exchange's naming
#[derive(Clone, Debug, PartialEq)]
pub struct RawFundingEntry {
    /// Native instrument identifier
    pub symbol: String,
    /// Funding rate normalized to a per-hour basis
    pub rate: f64,
    pub mark_price: Option<f64>,
    pub oracle_price: Option<f64>,
    /// Only populated by adapters that expose rich per-asset context
    pub context: Option<MarketContext>,
}

impl RawFundingEntry {
    pub fn new(symbol: impl Into<String>, rate: f64, mark_price: Option<f64>, oracle_price: Option<f64>) -> Self {
        Self {
            symbol: symbol.into(),
            rate,
            mark_price,
            oracle_price,
            context: None,
        }
    }

    pub fn with_context(mut self, context: MarketContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Mark/oracle deviation in basis points, when both prices are usable
    pub fn spread_bps(&self) -> Option<f64> {
        match (self.mark_price, self.oracle_price) {
            (Some(mark), Some(oracle)) => spread_bps(mark, oracle),
            _ => None,
        }
    }
}

/// `(mark - oracle) / oracle * 10_000`, or `None` when the result would not be finite
pub fn spread_bps(mark_price: f64, oracle_price: f64) -> Option<f64> {
    if oracle_price == 0.0 || !mark_price.is_finite() || !oracle_price.is_finite() {
        return None;
    }
    let bps = (mark_price - oracle_price) / oracle_price * 10_000.0;
    bps.is_finite().then_some(bps)
}

/// Funding observation keyed by canonical symbol
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub symbol: Symbol,
    pub rate: f64,
    pub mark_price: Option<f64>,
    pub oracle_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub context: Option<MarketContext>,
}

/// Classification of a failed adapter fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Transport,
    Malformed,
    ExchangeReported,
    RateLimited,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Transport => write!(f, "transport failure"),
            FetchErrorKind::Malformed => write!(f, "malformed payload"),
            FetchErrorKind::ExchangeReported => write!(f, "exchange reported error"),
            FetchErrorKind::RateLimited => write!(f, "rate limited"),
        }
    }
}

/// Result of one adapter call: fail-soft data plus an explicit status flag
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchOutcome {
    pub entries: Vec<RawFundingEntry>,
    pub error: Option<FetchErrorKind>,
}

impl FetchOutcome {
    pub fn ok(entries: Vec<RawFundingEntry>) -> Self {
        Self { entries, error: None }
    }

    pub fn failed(kind: FetchErrorKind) -> Self {
        Self {
            entries: Vec::new(),
            error: Some(kind),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.error == Some(FetchErrorKind::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_bps() {
        let bps = spread_bps(50_010.0, 50_000.0).unwrap();
        assert!((bps - 2.0).abs() < 1e-9);

        let negative = spread_bps(99.0, 100.0).unwrap();
        assert!((negative + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_spread_bps_rejects_degenerate_prices() {
        assert_eq!(spread_bps(100.0, 0.0), None);
        assert_eq!(spread_bps(f64::NAN, 100.0), None);
        assert_eq!(spread_bps(100.0, f64::INFINITY), None);

        let entry = RawFundingEntry::new("BTCUSDT", 0.0001, Some(50_000.0), None);
        assert_eq!(entry.spread_bps(), None);
    }

    #[test]
    fn test_exchange_id_parsing() {
        assert_eq!("Binance".parse::<ExchangeId>().unwrap(), ExchangeId::Binance);
        assert_eq!(" bybit ".parse::<ExchangeId>().unwrap(), ExchangeId::Bybit);
        assert!("kraken".parse::<ExchangeId>().is_err());
        assert_eq!(ExchangeId::Hyperliquid.as_str(), "hyperliquid");
    }
}
