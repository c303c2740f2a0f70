//! Whole-series indicator helpers.
//!
//! Every function returns a vector of the same length as its input. Slots that fall in
//! the indicator's warm-up window hold `NaN`, so `out[i]` always describes candle `i`.

use statrs::statistics::Statistics;
use strategy_lab_core::Candle;

use super::checked_period;
use super::prelude::*;

fn drive<I: Indicator>(mut indicator: I, values: &[f64]) -> Vec<f64> {
    values.iter().map(|&v| indicator.update(v).value).collect()
}

pub fn sma(values: &[f64], period: i64) -> Result<Vec<f64>, IndicatorError> {
    Ok(drive(Sma::new(period)?, values))
}

pub fn ema(values: &[f64], period: i64) -> Result<Vec<f64>, IndicatorError> {
    Ok(drive(Ema::new(period)?, values))
}

pub fn rsi(values: &[f64], period: i64) -> Result<Vec<f64>, IndicatorError> {
    Ok(drive(Rsi::new(period)?, values))
}

/// MACD line, signal line and histogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(values: &[f64], fast: i64, slow: i64, signal: i64) -> Result<MacdSeries, IndicatorError> {
    let mut indicator = Macd::new(fast, slow, signal)?;
    let mut out = MacdSeries {
        macd: Vec::with_capacity(values.len()),
        signal: Vec::with_capacity(values.len()),
        histogram: Vec::with_capacity(values.len()),
    };
    for &v in values {
        let reading = indicator.update(v);
        let signal_line = reading.signal.unwrap_or(f64::NAN);
        out.macd.push(reading.value);
        out.signal.push(signal_line);
        out.histogram.push(reading.value - signal_line);
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(values: &[f64], period: i64, sigma: f64) -> Result<BollingerSeries, IndicatorError> {
    let mut bands = BollingerBands::new(period, sigma)?;
    let mut out = BollingerSeries::default();
    for &v in values {
        let b = bands.next_bands(v);
        out.upper.push(b.upper);
        out.middle.push(b.middle);
        out.lower.push(b.lower);
    }
    Ok(out)
}

pub fn atr(candles: &[Candle], period: i64) -> Result<Vec<f64>, IndicatorError> {
    let mut indicator = Atr::new(period)?;
    Ok(candles
        .iter()
        .map(|c| indicator.update_ohlcv(c).value)
        .collect())
}

/// Arithmetic mean; `NaN` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Population standard deviation; `NaN` for an empty slice.
pub fn stdev(values: &[f64]) -> f64 {
    values.iter().population_std_dev()
}

/// Rolling maximum over `period` values, `NaN` until the window fills.
pub fn highest(values: &[f64], period: i64) -> Result<Vec<f64>, IndicatorError> {
    let period = checked_period("highest", period)? as usize;
    Ok(rolling(values, period, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }))
}

/// Rolling minimum over `period` values, `NaN` until the window fills.
pub fn lowest(values: &[f64], period: i64) -> Result<Vec<f64>, IndicatorError> {
    let period = checked_period("lowest", period)? as usize;
    Ok(rolling(values, period, |w| {
        w.iter().copied().fold(f64::INFINITY, f64::min)
    }))
}

fn rolling(values: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                f64::NAN
            } else {
                f(&values[i + 1 - period..=i])
            }
        })
        .collect()
}
