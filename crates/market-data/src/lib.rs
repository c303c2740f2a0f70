//! Historical market data for Strategy Lab.
//!
//! Providers load candles for a [`MarketDataQuery`]; the [`CandleCache`] is owned by the
//! caller and shared explicitly, never held in a global.

pub mod cache;
pub mod error;
pub mod provider;
pub mod query;
pub mod symbol;
pub mod timeframe;

pub use cache::{CacheConfig, CandleCache};
pub use error::{MarketDataError, MarketDataResult};
pub use provider::{CachedProvider, FileProvider, MarketDataProvider};
pub use query::MarketDataQuery;
pub use symbol::{validate_symbol, SymbolKind};
pub use timeframe::Timeframe;
