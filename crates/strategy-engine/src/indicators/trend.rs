use crate::indicators::{checked_period, Indicator, IndicatorError, IndicatorValue};
use yata::core::{Method, PeriodType, ValueType};
use yata::methods::{EMA, SMA};

// ============================================================================
// SMA
// ============================================================================
/// Simple Moving Average (SMA).
///
/// An unweighted moving average.
pub struct Sma {
    inner: SMA,
    current: Option<ValueType>,
    samples: usize,
    period: usize,
}

impl Sma {
    /// Create a new SMA.
    pub fn new(period: i64) -> Result<Self, IndicatorError> {
        let length = checked_period("SMA", period)?;
        let inner = SMA::new(length, &0.0).map_err(|_| IndicatorError::InvalidPeriod {
            indicator: "SMA",
            period,
            max: PeriodType::MAX,
        })?;
        Ok(Self {
            inner,
            current: None,
            samples: 0,
            period: length as usize,
        })
    }
}

impl Indicator for Sma {
    fn name(&self) -> &'static str {
        "SMA"
    }

    fn update(&mut self, price: f64) -> IndicatorValue {
        let result = self.inner.next(&price);
        self.samples += 1;
        // The window is pre-filled with zeros until `period` real samples arrive.
        self.current = self.is_ready().then_some(result);
        IndicatorValue::single(self.current.unwrap_or(f64::NAN))
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.current.map(IndicatorValue::single)
    }

    fn warmup_period(&self) -> usize {
        self.period
    }

    fn is_ready(&self) -> bool {
        self.samples >= self.period
    }
}

// ============================================================================
// EMA
// ============================================================================
/// Exponential Moving Average (EMA).
///
/// A weighted moving average that gives more weighting or importance to recent price data.
/// The average is seeded with the SMA of the first `period` samples.
pub struct Ema {
    inner: Option<EMA>,
    length: PeriodType,
    seed_sum: f64,
    current: Option<ValueType>,
    samples: usize,
    period: usize,
}

impl Ema {
    /// Create a new EMA.
    pub fn new(period: i64) -> Result<Self, IndicatorError> {
        let length = checked_period("EMA", period)?;
        Ok(Self {
            inner: None,
            length,
            seed_sum: 0.0,
            current: None,
            samples: 0,
            period: length as usize,
        })
    }
}

impl Indicator for Ema {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn update(&mut self, price: f64) -> IndicatorValue {
        self.samples += 1;
        let result = match self.inner.as_mut() {
            Some(ema) => Some(ema.next(&price)),
            None => {
                self.seed_sum += price;
                if self.samples == self.period {
                    let seed = self.seed_sum / self.period as f64;
                    self.inner = EMA::new(self.length, &seed).ok();
                    Some(seed)
                } else {
                    None
                }
            }
        };
        self.current = result;
        IndicatorValue::single(result.unwrap_or(f64::NAN))
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.current.map(IndicatorValue::single)
    }

    fn warmup_period(&self) -> usize {
        self.period
    }

    fn is_ready(&self) -> bool {
        self.samples >= self.period
    }
}

// ============================================================================
// MACD
// ============================================================================
/// Moving Average Convergence/Divergence (MACD).
///
/// A trend-following momentum indicator that shows the relationship between two moving averages of prices.
/// The signal line only starts consuming MACD values once the slow average is ready.
pub struct Macd {
    fast_ema: Ema,
    slow_ema: Ema,
    signal_ema: Ema,
    current_macd: Option<ValueType>,
    current_signal: Option<ValueType>,
    warmup: usize,
}

impl Macd {
    /// Create a new MACD.
    pub fn new(fast_period: i64, slow_period: i64, signal_period: i64) -> Result<Self, IndicatorError> {
        let fast_ema = Ema::new(fast_period)?;
        let slow_ema = Ema::new(slow_period)?;
        let signal_ema = Ema::new(signal_period)?;
        if fast_ema.period >= slow_ema.period {
            return Err(IndicatorError::InvalidPeriodOrder {
                indicator: "MACD",
                fast: fast_ema.period,
                slow: slow_ema.period,
            });
        }
        let warmup = slow_ema.period + signal_ema.period - 1;
        Ok(Self {
            fast_ema,
            slow_ema,
            signal_ema,
            current_macd: None,
            current_signal: None,
            warmup,
        })
    }
}

impl Indicator for Macd {
    fn name(&self) -> &'static str {
        "MACD"
    }

    fn update(&mut self, price: f64) -> IndicatorValue {
        let fast = self.fast_ema.update(price).value;
        let slow = self.slow_ema.update(price).value;

        if self.slow_ema.is_ready() {
            let macd_line = fast - slow;
            // Signal line is EMA of MACD line
            let signal_line = self.signal_ema.update(macd_line);
            self.current_macd = Some(macd_line);
            self.current_signal = self.signal_ema.is_ready().then_some(signal_line.value);
        }

        IndicatorValue {
            value: self.current_macd.unwrap_or(f64::NAN),
            signal: Some(self.current_signal.unwrap_or(f64::NAN)),
        }
    }

    fn current(&self) -> Option<IndicatorValue> {
        match (self.current_macd, self.current_signal) {
            (Some(m), Some(s)) => Some(IndicatorValue {
                value: m,
                signal: Some(s),
            }),
            _ => None,
        }
    }

    fn warmup_period(&self) -> usize {
        self.warmup
    }

    fn is_ready(&self) -> bool {
        self.current_signal.is_some()
    }
}
