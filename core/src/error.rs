use thiserror::Error;

/// Raised when a token cannot be interpreted as a trading signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised signal token: {token:?}")]
pub struct SignalParseError {
    /// The offending token as written by the strategy.
    pub token: String,
}
