use crate::indicators::trend::Sma;
use crate::indicators::{checked_period, Indicator, IndicatorError, IndicatorValue};
use std::collections::VecDeque;
use strategy_lab_core::Candle;

// ============================================================================
// ATR
// ============================================================================
/// Average True Range (ATR).
///
/// A market volatility indicator derived from the Wilder-smoothed true range. Only
/// meaningful through [`Indicator::update_ohlcv`].
#[derive(Debug, Clone)]
pub struct Atr {
    prev_close: Option<f64>,
    tr_sum: f64,
    atr: Option<f64>,
    samples: usize,
    period: usize,
}

impl Atr {
    /// Create a new ATR indicator.
    pub fn new(period: i64) -> Result<Self, IndicatorError> {
        let period = checked_period("ATR", period)? as usize;
        Ok(Self {
            prev_close: None,
            tr_sum: 0.0,
            atr: None,
            samples: 0,
            period,
        })
    }
}

impl Indicator for Atr {
    fn name(&self) -> &'static str {
        "ATR"
    }

    fn update(&mut self, price: f64) -> IndicatorValue {
        self.update_ohlcv(&Candle::flat(0, price))
    }

    fn update_ohlcv(&mut self, candle: &Candle) -> IndicatorValue {
        let (h, l, c) = (candle.high, candle.low, candle.close);

        let tr = if let Some(prev_c) = self.prev_close {
            let hl = h - l;
            let h_pc = (h - prev_c).abs();
            let l_pc = (l - prev_c).abs();
            hl.max(h_pc).max(l_pc)
        } else {
            h - l
        };
        self.prev_close = Some(c);
        self.samples += 1;

        let n = self.period as f64;
        self.atr = match self.atr {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.tr_sum += tr;
                (self.samples == self.period).then(|| self.tr_sum / n)
            }
        };

        IndicatorValue::single(self.atr.unwrap_or(f64::NAN))
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.atr.map(IndicatorValue::single)
    }

    fn warmup_period(&self) -> usize {
        self.period
    }

    fn is_ready(&self) -> bool {
        self.atr.is_some()
    }
}

// ============================================================================
// Bollinger Bands
// ============================================================================
/// Bollinger Bands.
///
/// Defined by a set of trendlines plotted `sigma` population standard deviations
/// (positively and negatively) away from a simple moving average (SMA) of a security's price.
pub struct BollingerBands {
    sma: Sma,
    sigma: f64,
    period: usize,
    history: VecDeque<f64>,
    current: Option<BollingerBandsOutput>,
}

/// One reading of the three bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBandsOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBandsOutput {
    const WARMING_UP: Self = Self {
        upper: f64::NAN,
        middle: f64::NAN,
        lower: f64::NAN,
    };
}

impl BollingerBands {
    /// Create new Bollinger Bands with specified period and standard deviation multiplier (sigma).
    pub fn new(period: i64, sigma: f64) -> Result<Self, IndicatorError> {
        let sma = Sma::new(period)?;
        let period = sma.warmup_period();
        Ok(Self {
            sma,
            sigma,
            period,
            history: VecDeque::with_capacity(period),
            current: None,
        })
    }

    /// Feed one price and return all three bands.
    pub fn next_bands(&mut self, price: f64) -> BollingerBandsOutput {
        self.history.push_back(price);
        if self.history.len() > self.period {
            self.history.pop_front();
        }

        let mid = self.sma.update(price).value;
        if !self.sma.is_ready() {
            return BollingerBandsOutput::WARMING_UP;
        }

        let variance: f64 =
            self.history.iter().map(|&x| (x - mid).powi(2)).sum::<f64>() / self.period as f64;
        let dev = variance.sqrt();

        let bands = BollingerBandsOutput {
            upper: mid + self.sigma * dev,
            middle: mid,
            lower: mid - self.sigma * dev,
        };
        self.current = Some(bands);
        bands
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &'static str {
        "Bollinger Bands"
    }

    fn update(&mut self, price: f64) -> IndicatorValue {
        let bands = self.next_bands(price);
        IndicatorValue {
            value: bands.middle,
            signal: Some(bands.upper),
        }
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.current.map(|b| IndicatorValue {
            value: b.middle,
            signal: Some(b.upper),
        })
    }

    fn warmup_period(&self) -> usize {
        self.period
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn atr_averages_true_range_then_smooths() {
        let mut atr = Atr::new(2).unwrap();
        assert!(atr.update_ohlcv(&bar(11.0, 9.0, 10.0)).value.is_nan()); // TR 2
        let first = atr.update_ohlcv(&bar(14.0, 12.0, 13.0)).value; // TR 4 (gap from 10)
        assert!((first - 3.0).abs() < 1e-12);
        let second = atr.update_ohlcv(&bar(13.0, 12.0, 12.5)).value; // TR 1
        assert!((second - 2.0).abs() < 1e-12);
    }

    #[test]
    fn bollinger_bands_collapse_on_flat_prices() {
        let mut bb = BollingerBands::new(4, 2.0).unwrap();
        let mut out = BollingerBandsOutput::WARMING_UP;
        for _ in 0..6 {
            out = bb.next_bands(25.0);
        }
        assert_eq!(out.upper, 25.0);
        assert_eq!(out.middle, 25.0);
        assert_eq!(out.lower, 25.0);
    }

    #[test]
    fn bollinger_width_uses_population_deviation() {
        let mut bb = BollingerBands::new(2, 1.0).unwrap();
        bb.next_bands(1.0);
        let out = bb.next_bands(3.0);
        assert_eq!(out.middle, 2.0);
        assert!((out.upper - 3.0).abs() < 1e-12);
        assert!((out.lower - 1.0).abs() < 1e-12);
    }
}
