use crate::indicators::{checked_period, Indicator, IndicatorError, IndicatorValue};

// ============================================================================
// RSI
// ============================================================================
/// Relative Strength Index (RSI).
///
/// Measures the speed and change of price movements.
/// RSI oscillates between zero and 100.
/// Traditionally, and according to Wilder, RSI is considered overbought when above 70 and oversold when below 30.
///
/// The first value is produced once `period` price changes have been observed, i.e. on
/// the `period + 1`-th price.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    changes: usize,
    prev_val: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    /// Create a new RSI indicator with the specified period.
    pub fn new(period: i64) -> Result<Self, IndicatorError> {
        let period = checked_period("RSI", period)? as usize;
        Ok(Self {
            period,
            changes: 0,
            prev_val: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
        })
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            // Max RSI if no loss
            100.0
        } else {
            let rs = self.avg_gain / self.avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &'static str {
        "RSI"
    }

    fn update(&mut self, price: f64) -> IndicatorValue {
        if let Some(prev) = self.prev_val {
            let change = price - prev;
            let gain = if change > 0.0 { change } else { 0.0 };
            let loss = if change < 0.0 { -change } else { 0.0 };
            self.changes += 1;

            if self.changes < self.period {
                // Initial SMA phase for Wilder's (accumulation)
                self.avg_gain += gain;
                self.avg_loss += loss;
            } else if self.changes == self.period {
                // First average: Include the current (Nth) gain/loss, then divide
                self.avg_gain = (self.avg_gain + gain) / self.period as f64;
                self.avg_loss = (self.avg_loss + loss) / self.period as f64;
            } else {
                // Smoothing thereafter: (PREV * (N-1) + CURR) / N
                let n = self.period as f64;
                self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
                self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
            }
        }
        self.prev_val = Some(price);

        IndicatorValue::single(self.current().map_or(f64::NAN, |v| v.value))
    }

    fn current(&self) -> Option<IndicatorValue> {
        self.is_ready().then(|| IndicatorValue::single(self.value()))
    }

    fn warmup_period(&self) -> usize {
        self.period + 1
    }

    fn is_ready(&self) -> bool {
        self.changes >= self.period
    }
}
