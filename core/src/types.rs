use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SignalParseError;

/// Default commission rate applied to both fills.
pub const DEFAULT_COMMISSION_RATE: f64 = 0.001;

/// Default adverse slippage applied to both fills.
pub const DEFAULT_SLIPPAGE_RATE: f64 = 0.0005;

/// Default starting cash for a backtest.
pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// OHLCV price bar for one interval.
///
/// A series of candles is expected in ascending timestamp order; the index of a candle
/// in that series is the simulation clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Bar open time in epoch milliseconds
    pub timestamp: TimestampMs,
    /// Opening price
    pub open: f64,
    /// Highest traded price
    pub high: f64,
    /// Lowest traded price
    pub low: f64,
    /// Closing price, used for fills and valuation
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl Candle {
    /// Convenience constructor for a bar where only the close matters.
    pub fn flat(timestamp: TimestampMs, close: f64) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }
}

/// Per-candle trading intent produced by a strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Open a long position if flat
    Buy,
    /// Close the open position if long
    Sell,
    /// Do nothing
    #[default]
    Hold,
}

impl Signal {
    /// Lowercase wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "buy",
            Signal::Sell => "sell",
            Signal::Hold => "hold",
        }
    }

    /// A sequence of `len` hold signals, the degraded output of a failed strategy run.
    pub fn all_hold(len: usize) -> Vec<Signal> {
        vec![Signal::Hold; len]
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = SignalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.eq_ignore_ascii_case("buy") {
            Ok(Signal::Buy)
        } else if token.eq_ignore_ascii_case("sell") {
            Ok(Signal::Sell)
        } else if token.eq_ignore_ascii_case("hold") {
            Ok(Signal::Hold)
        } else {
            Err(SignalParseError {
                token: s.to_string(),
            })
        }
    }
}

/// Direction of a completed trade. Only long trades exist in the single-asset model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Bought first, sold later
    #[default]
    Long,
}

/// A closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Timestamp of the entry candle
    pub entry_time: TimestampMs,
    /// Timestamp of the exit candle
    pub exit_time: TimestampMs,
    /// Fill price after slippage on entry
    pub entry_price: f64,
    /// Fill price after slippage on exit
    pub exit_price: f64,
    /// Units held for the duration of the trade
    pub quantity: f64,
    /// Trade direction
    pub side: TradeSide,
    /// Profit or loss net of the exit commission
    pub pnl: f64,
    /// Price move between fills, in percent
    pub pnl_percent: f64,
}

/// Mark-to-market account value at one candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    /// Candle timestamp
    pub timestamp: TimestampMs,
    /// Cash plus position value
    pub equity: f64,
}

/// Decline from the running equity peak at one candle, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownPoint {
    /// Candle timestamp
    pub timestamp: TimestampMs,
    /// Percentage below the running peak
    pub drawdown: f64,
}

/// Period-over-period equity change at one candle, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPoint {
    /// Candle timestamp
    pub timestamp: TimestampMs,
    /// Percentage change versus the previous candle's equity
    #[serde(rename = "return")]
    pub return_pct: f64,
}

/// Headline performance figures for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    /// Percent change from initial to final equity
    pub total_return: f64,
    /// Compound annual growth rate in percent
    pub cagr: f64,
    /// Annualised Sharpe ratio (zero risk-free rate)
    pub sharpe: f64,
    /// Annualised Sortino ratio
    pub sortino: f64,
    /// Largest peak-to-trough decline in percent
    pub max_drawdown: f64,
    /// CAGR over max drawdown
    pub calmar: f64,
    /// Share of profitable trades in percent
    pub win_rate: f64,
    /// Gross profit over gross loss; infinite when nothing was lost
    pub profit_factor: f64,
    /// Annualised volatility of returns in percent
    pub volatility: f64,
    /// Number of closed trades
    pub total_trades: usize,
}

/// Everything a single backtest produces. Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    /// Equity at every candle
    pub equity_curve: Vec<EquityPoint>,
    /// Drawdown at every candle
    pub drawdown_series: Vec<DrawdownPoint>,
    /// Percent return at every candle
    pub returns_series: Vec<ReturnPoint>,
    /// Closed trades in order of exit
    pub trade_log: Vec<Trade>,
    /// Summary statistics
    pub summary_stats: SummaryStats,
}

/// Inline backtest input: strategy source plus the candles to run it on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    /// Strategy script defining `fn strategy(data)`
    pub strategy_code: String,
    /// Candles in ascending timestamp order
    pub data: Vec<Candle>,
    /// Starting cash
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Commission rate per fill
    #[serde(default = "default_commission")]
    pub commission: f64,
    /// Slippage rate per fill
    #[serde(default = "default_slippage")]
    pub slippage: f64,
}

fn default_initial_capital() -> f64 {
    DEFAULT_INITIAL_CAPITAL
}

fn default_commission() -> f64 {
    DEFAULT_COMMISSION_RATE
}

fn default_slippage() -> f64 {
    DEFAULT_SLIPPAGE_RATE
}
