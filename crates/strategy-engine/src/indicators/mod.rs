//! Technical indicators available to strategy scripts.
//!
//! Each indicator is a small streaming state machine fed one value (or one candle) at a
//! time. [`series`] drives them over whole slices and produces output aligned with the
//! input, which is the shape strategy scripts work with.

use strategy_lab_core::Candle;
use thiserror::Error;
use yata::core::PeriodType;

pub mod momentum;
pub mod series;
pub mod trend;
pub mod volatility;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorValue {
    pub value: f64,
    pub signal: Option<f64>,
}

impl IndicatorValue {
    pub(crate) fn single(value: f64) -> Self {
        Self {
            value,
            signal: None,
        }
    }
}

pub trait Indicator: Send {
    fn name(&self) -> &'static str;
    fn update(&mut self, price: f64) -> IndicatorValue;
    fn update_ohlcv(&mut self, candle: &Candle) -> IndicatorValue {
        self.update(candle.close)
    }
    fn current(&self) -> Option<IndicatorValue>;
    fn warmup_period(&self) -> usize;
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("{indicator}: period must be between 1 and {max}, got {period}")]
    InvalidPeriod {
        indicator: &'static str,
        period: i64,
        max: PeriodType,
    },
    #[error("{indicator}: fast period {fast} must be shorter than slow period {slow}")]
    InvalidPeriodOrder {
        indicator: &'static str,
        fast: usize,
        slow: usize,
    },
}

/// Checks that `period` fits the indicator window type.
pub fn checked_period(indicator: &'static str, period: i64) -> Result<PeriodType, IndicatorError> {
    match PeriodType::try_from(period) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(IndicatorError::InvalidPeriod {
            indicator,
            period,
            max: PeriodType::MAX,
        }),
    }
}

pub mod prelude {
    pub use super::Indicator;
    pub use super::IndicatorError;
    pub use super::IndicatorValue;

    pub use super::momentum::Rsi;
    pub use super::trend::{Ema, Macd, Sma};
    pub use super::volatility::{Atr, BollingerBands, BollingerBandsOutput};
}
