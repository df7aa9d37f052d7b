//! Engine configuration
//!
//! Every tunable is a plain constant with a default; `from_env` overrides
//! individual values from `FUNDING_*` and per-exchange environment variables.

use crate::exchanges::{AdapterConfig, ExchangeId, BINANCE_BASE_URL, BYBIT_BASE_URL, HYPERLIQUID_BASE_URL};
use crate::market_data::WindowConfig;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    #[error("retention window ({retention:?}) is shorter than the poll interval ({poll:?})")]
    RetentionShorterThanPoll { retention: Duration, poll: Duration },

    #[error("minimum fetch spacing ({spacing:?}) must be shorter than the poll interval ({poll:?})")]
    SpacingNotBelowPoll { spacing: Duration, poll: Duration },

    #[error("invalid base URL for {exchange}: {reason}")]
    InvalidBaseUrl { exchange: ExchangeId, reason: String },

    #[error("invalid API bind address {0:?}")]
    InvalidBind(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub retention_window: Duration,
    /// Ticks arriving sooner than this after the last fetch start are ignored
    pub min_fetch_spacing: Duration,
    pub initial_backoff: Duration,
    pub max_retries: u32,
    /// Stop scheduled ticks after giving up, until resume or refresh
    pub halt_on_give_up: bool,

    pub hyperliquid: AdapterConfig,
    pub binance: AdapterConfig,
    pub bybit: AdapterConfig,

    pub store_capacity: usize,
    pub retention_days: u32,
    pub prune_interval: Duration,
    pub api_bind: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            retention_window: Duration::from_secs(5 * 60),
            min_fetch_spacing: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(5),
            max_retries: 3,
            halt_on_give_up: false,
            hyperliquid: AdapterConfig::new(HYPERLIQUID_BASE_URL, 1),
            binance: AdapterConfig::new(BINANCE_BASE_URL, 8),
            bybit: AdapterConfig::new(BYBIT_BASE_URL, 8),
            store_capacity: 500_000,
            retention_days: 7,
            prune_interval: Duration::from_secs(24 * 60 * 60),
            api_bind: SocketAddr::from(([127, 0, 0, 1], 3030)),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults overridden by an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Self::default();

        let request_timeout = vars.secs("FUNDING_REQUEST_TIMEOUT_SECS", defaults.hyperliquid.request_timeout);
        let adapter = |exchange: ExchangeId, default: &AdapterConfig| {
            let prefix = exchange.as_str().to_ascii_uppercase();
            AdapterConfig {
                base_url: vars.string(&format!("{}_BASE_URL", prefix), &default.base_url),
                request_timeout,
                funding_interval_hours: vars.u32(
                    &format!("{}_FUNDING_HOURS", prefix),
                    default.funding_interval_hours,
                ),
            }
        };

        let bind = vars.string("FUNDING_API_BIND", &defaults.api_bind.to_string());
        let api_bind = bind.parse().map_err(|_| ConfigError::InvalidBind(bind.clone()))?;

        Ok(Self {
            poll_interval: vars.secs("FUNDING_POLL_SECS", defaults.poll_interval),
            retention_window: vars.secs("FUNDING_RETENTION_SECS", defaults.retention_window),
            min_fetch_spacing: vars.secs("FUNDING_MIN_SPACING_SECS", defaults.min_fetch_spacing),
            initial_backoff: vars.millis("FUNDING_INITIAL_BACKOFF_MS", defaults.initial_backoff),
            max_retries: vars.u32("FUNDING_MAX_RETRIES", defaults.max_retries),
            halt_on_give_up: vars.bool("FUNDING_HALT_ON_GIVE_UP", defaults.halt_on_give_up),
            hyperliquid: adapter(ExchangeId::Hyperliquid, &defaults.hyperliquid),
            binance: adapter(ExchangeId::Binance, &defaults.binance),
            bybit: adapter(ExchangeId::Bybit, &defaults.bybit),
            store_capacity: vars.u64("FUNDING_STORE_CAPACITY", defaults.store_capacity as u64) as usize,
            retention_days: vars.u32("FUNDING_RETENTION_DAYS", defaults.retention_days),
            prune_interval: vars.secs("FUNDING_PRUNE_INTERVAL_SECS", defaults.prune_interval),
            api_bind,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("poll_interval", self.poll_interval),
            ("retention_window", self.retention_window),
            ("min_fetch_spacing", self.min_fetch_spacing),
            ("initial_backoff", self.initial_backoff),
            ("prune_interval", self.prune_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::NonPositive(name));
            }
        }

        if self.retention_window < self.poll_interval {
            return Err(ConfigError::RetentionShorterThanPoll {
                retention: self.retention_window,
                poll: self.poll_interval,
            });
        }
        // Otherwise every other scheduled tick falls inside the spacing and is dropped
        if self.min_fetch_spacing >= self.poll_interval {
            return Err(ConfigError::SpacingNotBelowPoll {
                spacing: self.min_fetch_spacing,
                poll: self.poll_interval,
            });
        }
        if self.store_capacity == 0 {
            return Err(ConfigError::NonPositive("store_capacity"));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::NonPositive("retention_days"));
        }

        for exchange in ExchangeId::ALL {
            let adapter = self.adapter(exchange);
            if adapter.funding_interval_hours == 0 {
                return Err(ConfigError::NonPositive("funding_interval_hours"));
            }
            if adapter.request_timeout.is_zero() {
                return Err(ConfigError::NonPositive("request_timeout"));
            }
            url::Url::parse(&adapter.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
                exchange,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    pub fn adapter(&self, exchange: ExchangeId) -> &AdapterConfig {
        match exchange {
            ExchangeId::Hyperliquid => &self.hyperliquid,
            ExchangeId::Binance => &self.binance,
            ExchangeId::Bybit => &self.bybit,
        }
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            retention_window: self.retention_window,
            poll_interval: self.poll_interval,
        }
    }
}

/// Variable source with typed, fall-back-to-default accessors
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn u64(&self, name: &str, default: u64) -> u64 {
        self.raw(name).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    fn u32(&self, name: &str, default: u32) -> u32 {
        self.raw(name).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    fn bool(&self, name: &str, default: bool) -> bool {
        self.raw(name)
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
            .unwrap_or(default)
    }

    fn secs(&self, name: &str, default: Duration) -> Duration {
        Duration::from_secs(self.u64(name, default.as_secs()))
    }

    fn millis(&self, name: &str, default: Duration) -> Duration {
        Duration::from_millis(self.u64(name, default.as_millis() as u64))
    }
}
