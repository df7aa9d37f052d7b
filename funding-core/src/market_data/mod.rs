//! Symbol normalization and rolling spread statistics

pub mod spread_window;
pub mod symbol_mapper;

pub use spread_window::{SpreadSample, SpreadStats, SpreadWindow, SpreadWindowTracker, WindowConfig};
pub use symbol_mapper::{SymbolConvention, SymbolNormalizer};
