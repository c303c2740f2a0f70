use strategy_engine::ValidationResult;
use thiserror::Error;

/// Reasons a backtest request is refused outright.
///
/// Everything that goes wrong inside strategy execution is absorbed by the sandbox and
/// shows up as a degraded run instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("strategy code failed validation: {}", .0.errors.join("; "))]
    Validation(ValidationResult),

    #[error("no market data supplied")]
    EmptyMarketData,

    #[error("backtest worker failed: {0}")]
    Worker(String),
}

impl BacktestError {
    /// Short machine-readable tag, used for metrics labels and API error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            BacktestError::Validation(_) => "validation",
            BacktestError::EmptyMarketData => "empty_market_data",
            BacktestError::Worker(_) => "worker",
        }
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
