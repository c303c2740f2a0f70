use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MarketDataError, MarketDataResult};

static CRYPTO_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]+/[A-Z0-9]+$").expect("crypto pair pattern is valid"));
static EQUITY_TICKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").expect("equity ticker pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// `BASE/QUOTE` pair such as `BTC/USDT`
    Crypto,
    /// Exchange ticker such as `AAPL`
    Equity,
}

/// Classifies `symbol`, rejecting anything that is neither a crypto pair nor a ticker.
pub fn validate_symbol(symbol: &str) -> MarketDataResult<SymbolKind> {
    let kind = if symbol.contains('/') {
        CRYPTO_PAIR.is_match(symbol).then_some(SymbolKind::Crypto)
    } else {
        EQUITY_TICKER.is_match(symbol).then_some(SymbolKind::Equity)
    };
    kind.ok_or_else(|| MarketDataError::InvalidSymbol(symbol.to_string()))
}
