use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    #[error("invalid date {value:?}: expected YYYY-MM-DD or RFC 3339")]
    InvalidDate { value: String },

    #[error("start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("no data source for {symbol} at {timeframe}")]
    NotFound { symbol: String, timeframe: String },

    #[error("failed to read market data: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed candle file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type MarketDataResult<T> = Result<T, MarketDataError>;
