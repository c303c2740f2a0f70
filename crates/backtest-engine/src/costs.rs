//! Execution cost model: proportional slippage on fills and proportional commission.

use serde::{Deserialize, Serialize};
use strategy_lab_core::{DEFAULT_COMMISSION_RATE, DEFAULT_SLIPPAGE_RATE};

/// Rates applied to every simulated fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Fraction of the charged base taken as commission
    pub commission_rate: f64,
    /// Adverse price move applied to each fill, as a fraction of the close
    pub slippage_rate: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            commission_rate: DEFAULT_COMMISSION_RATE,
            slippage_rate: DEFAULT_SLIPPAGE_RATE,
        }
    }
}

impl CostModel {
    pub fn new(commission_rate: f64, slippage_rate: f64) -> Self {
        Self {
            commission_rate,
            slippage_rate,
        }
    }

    /// Frictionless fills.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Price paid when buying at `close`.
    pub fn buy_fill(&self, close: f64) -> f64 {
        close * (1.0 + self.slippage_rate)
    }

    /// Price received when selling at `close`.
    pub fn sell_fill(&self, close: f64) -> f64 {
        close * (1.0 - self.slippage_rate)
    }

    /// Commission charged on `base`.
    pub fn commission(&self, base: f64) -> f64 {
        base * self.commission_rate
    }

    /// Commission charged when opening a position with `capital` in cash.
    ///
    /// The charge scales with both the fill price and the whole cash balance, so once
    /// `entry_price * commission_rate` reaches 1 it swallows the balance and no position
    /// can be opened.
    pub fn entry_commission(&self, entry_price: f64, capital: f64) -> f64 {
        entry_price * capital * self.commission_rate
    }
}
