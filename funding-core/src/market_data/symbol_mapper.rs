//! Symbol mapping between exchanges and the canonical format
//!
//! Canonical symbols follow the base exchange's naming: a bare asset code
//! (`BTC`), with a lowercase `k` marker for contracts quoted per 1000 units
//! (`kPEPE`). Venues that list `1000PEPEUSDT` map onto the same symbol.
//! Mapping is rule-based and stateless, so it is safe to share freely.

use crate::exchanges::{ExchangeId, Symbol};

const SCALE_MARKER: char = 'k';

/// Naming rules of one exchange
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolConvention {
    /// Settlement currency appended to the asset code, if any
    pub settlement_suffix: Option<&'static str>,
    /// Literal prefix used for 1000x contracts, if the venue doesn't use the marker
    pub scale_prefix: Option<&'static str>,
}

impl SymbolConvention {
    pub fn for_exchange(exchange: ExchangeId) -> Self {
        match exchange {
            ExchangeId::Hyperliquid => Self {
                settlement_suffix: None,
                scale_prefix: None,
            },
            ExchangeId::Binance | ExchangeId::Bybit => Self {
                settlement_suffix: Some("USDT"),
                scale_prefix: Some("1000"),
            },
        }
    }
}

/// Quote currencies that mark a native symbol we do not map
const FOREIGN_QUOTES: [&str; 4] = ["USDT", "USDC", "BUSD", "PERP"];

/// Bidirectional native <-> canonical symbol translation
#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolNormalizer;

impl SymbolNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Native exchange symbol to canonical; unknown shapes pass through unchanged
    pub fn to_canonical(&self, native: &str, exchange: ExchangeId) -> Symbol {
        let convention = SymbolConvention::for_exchange(exchange);

        let base = match convention.settlement_suffix {
            Some(suffix) => match native.strip_suffix(suffix) {
                Some(base) if is_asset_code(base) => base,
                _ => return Symbol::new(native),
            },
            None => native,
        };

        if let Some(prefix) = convention.scale_prefix {
            if let Some(asset) = base.strip_prefix(prefix) {
                if starts_with_letter(asset) {
                    return Symbol::new(format!("{}{}", SCALE_MARKER, asset));
                }
            }
        }

        Symbol::new(base)
    }

    /// Canonical symbol to the exchange's native form; unknown shapes pass through unchanged
    pub fn to_native(&self, canonical: &Symbol, exchange: ExchangeId) -> String {
        let convention = SymbolConvention::for_exchange(exchange);
        let symbol = canonical.as_str();

        let Some(suffix) = convention.settlement_suffix else {
            return symbol.to_string();
        };
        if !is_asset_code(symbol) {
            return symbol.to_string();
        }

        let base = match (convention.scale_prefix, scaled_asset(symbol)) {
            (Some(prefix), Some(asset)) => format!("{}{}", prefix, asset),
            _ => symbol.to_string(),
        };

        format!("{}{}", base, suffix)
    }
}

/// Asset code for a marker-scaled canonical symbol (`kPEPE` -> `PEPE`)
fn scaled_asset(symbol: &str) -> Option<&str> {
    symbol
        .strip_prefix(SCALE_MARKER)
        .filter(|asset| asset.starts_with(|c: char| c.is_ascii_uppercase()))
}

fn starts_with_letter(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_alphabetic())
}

/// A bare alphanumeric asset code that doesn't itself end in a quote currency
fn is_asset_code(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric())
        && !FOREIGN_QUOTES.iter().any(|quote| s.ends_with(quote))
}
