//! Join of per-exchange funding rates and spread statistics
//!
//! Rates arrive already keyed by canonical symbol, so matching the other
//! exchanges against the base universe is a plain key lookup.

use super::{CombinedRecord, ExchangeQuote};
use crate::exchanges::{ExchangeId, FundingRate, Symbol};
use crate::market_data::SpreadWindowTracker;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct Aggregator {
    base: ExchangeId,
}

impl Aggregator {
    pub fn new(base: ExchangeId) -> Self {
        Self { base }
    }

    pub fn base(&self) -> ExchangeId {
        self.base
    }

    /// One record per distinct base symbol; missing data is `None`, never an error
    pub fn merge(
        &self,
        base_rates: &[FundingRate],
        others: &BTreeMap<ExchangeId, Vec<FundingRate>>,
        tracker: &SpreadWindowTracker,
    ) -> Vec<CombinedRecord> {
        let lookups: Vec<(ExchangeId, HashMap<&Symbol, &FundingRate>)> = others
            .iter()
            .filter(|(exchange, _)| **exchange != self.base)
            .map(|(exchange, rates)| (*exchange, index_by_symbol(rates)))
            .collect();

        let mut seen = HashSet::new();
        base_rates
            .iter()
            .filter(|rate| seen.insert(&rate.symbol))
            .map(|base_rate| {
                let symbol = &base_rate.symbol;

                let mut per_exchange = BTreeMap::new();
                per_exchange.insert(
                    self.base,
                    ExchangeQuote {
                        funding_rate: Some(base_rate.rate),
                        spread_stats: tracker.window_stats(self.base, symbol),
                    },
                );
                for (exchange, rates) in &lookups {
                    per_exchange.insert(
                        *exchange,
                        ExchangeQuote {
                            funding_rate: rates.get(symbol).map(|r| r.rate),
                            spread_stats: tracker.window_stats(*exchange, symbol),
                        },
                    );
                }

                let context = base_rate.context.clone().unwrap_or_default();
                CombinedRecord {
                    symbol: symbol.clone(),
                    per_exchange,
                    day_volume: context.day_volume,
                    open_interest: context.open_interest,
                    oracle_price: base_rate.oracle_price.or(context.oracle_price),
                    premium: context.premium,
                    prev_day_price: context.prev_day_price,
                    impact_prices: context.impact_prices,
                }
            })
            .collect()
    }
}

/// First occurrence wins when an exchange lists a symbol twice
fn index_by_symbol(rates: &[FundingRate]) -> HashMap<&Symbol, &FundingRate> {
    let mut index = HashMap::with_capacity(rates.len());
    for rate in rates {
        index.entry(&rate.symbol).or_insert(rate);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::MarketContext;
    use crate::market_data::WindowConfig;
    use chrono::Utc;

    fn rate(symbol: &str, rate: f64, mark: f64, oracle: f64) -> FundingRate {
        FundingRate {
            symbol: Symbol::new(symbol),
            rate,
            mark_price: Some(mark),
            oracle_price: Some(oracle),
            timestamp: Utc::now(),
            context: None,
        }
    }

    fn ingest_all(tracker: &mut SpreadWindowTracker, exchange: ExchangeId, rates: &[FundingRate]) {
        for r in rates {
            let bps = crate::exchanges::spread_bps(r.mark_price.unwrap(), r.oracle_price.unwrap()).unwrap();
            tracker.ingest(exchange, &r.symbol, bps, r.timestamp);
        }
    }

    #[test]
    fn test_partial_outage_null_fills() {
        let mut tracker = SpreadWindowTracker::new(WindowConfig::default());
        let base = vec![rate("BTC", 0.0001, 50_000.0, 49_990.0)];
        let bybit = vec![rate("BTC", 0.0002, 50_010.0, 50_000.0)];
        ingest_all(&mut tracker, ExchangeId::Hyperliquid, &base);
        ingest_all(&mut tracker, ExchangeId::Bybit, &bybit);

        let mut others = BTreeMap::new();
        others.insert(ExchangeId::Binance, Vec::new());
        others.insert(ExchangeId::Bybit, bybit);

        let records = Aggregator::new(ExchangeId::Hyperliquid).merge(&base, &others, &tracker);
        assert_eq!(records.len(), 1);

        let btc = &records[0];
        assert_eq!(btc.symbol, Symbol::new("BTC"));
        assert_eq!(btc.funding_rate(ExchangeId::Hyperliquid), Some(0.0001));
        assert_eq!(btc.funding_rate(ExchangeId::Binance), None);
        assert_eq!(btc.funding_rate(ExchangeId::Bybit), Some(0.0002));

        assert!(btc.quote(ExchangeId::Hyperliquid).unwrap().spread_stats.is_some());
        assert!(btc.quote(ExchangeId::Binance).unwrap().spread_stats.is_none());
        let bybit_stats = btc.quote(ExchangeId::Bybit).unwrap().spread_stats.unwrap();
        assert!((bybit_stats.current.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_base_universe_defines_symbol_set() {
        let tracker = SpreadWindowTracker::new(WindowConfig::default());
        let base = vec![
            rate("BTC", 0.0001, 1.0, 1.0),
            rate("ETH", 0.0002, 1.0, 1.0),
            rate("BTC", 0.0009, 1.0, 1.0),
        ];
        let mut others = BTreeMap::new();
        others.insert(
            ExchangeId::Binance,
            vec![rate("ETH", 0.0003, 1.0, 1.0), rate("DOGE", 0.0004, 1.0, 1.0)],
        );

        let records = Aggregator::new(ExchangeId::Hyperliquid).merge(&base, &others, &tracker);
        let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTC", "ETH"]);

        // Duplicates keep the first occurrence
        assert_eq!(records[0].funding_rate(ExchangeId::Hyperliquid), Some(0.0001));
        assert_eq!(records[1].funding_rate(ExchangeId::Binance), Some(0.0003));
        assert_eq!(records[0].funding_rate(ExchangeId::Binance), None);
    }

    #[test]
    fn test_auxiliary_fields_come_from_base_context() {
        let tracker = SpreadWindowTracker::new(WindowConfig::default());
        let mut btc = rate("BTC", 0.0001, 50_000.0, 49_990.0);
        btc.context = Some(MarketContext {
            day_volume: Some(1.5e9),
            open_interest: Some(12_000.0),
            premium: Some(0.0002),
            prev_day_price: Some(49_000.0),
            impact_prices: (Some(49_999.0), Some(50_002.0)),
            ..MarketContext::default()
        });

        let records = Aggregator::new(ExchangeId::Hyperliquid).merge(&[btc], &BTreeMap::new(), &tracker);
        let record = &records[0];
        assert_eq!(record.day_volume, Some(1.5e9));
        assert_eq!(record.open_interest, Some(12_000.0));
        assert_eq!(record.oracle_price, Some(49_990.0));
        assert_eq!(record.premium, Some(0.0002));
        assert_eq!(record.prev_day_price, Some(49_000.0));
        assert_eq!(record.impact_prices, (Some(49_999.0), Some(50_002.0)));
    }

    #[test]
    fn test_empty_base_yields_no_records() {
        let tracker = SpreadWindowTracker::new(WindowConfig::default());
        let mut others = BTreeMap::new();
        others.insert(ExchangeId::Bybit, vec![rate("BTC", 0.0002, 1.0, 1.0)]);
        assert!(Aggregator::new(ExchangeId::Hyperliquid)
            .merge(&[], &others, &tracker)
            .is_empty());
    }
}
