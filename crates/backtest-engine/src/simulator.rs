//! Replays a signal sequence against candles, one long position at a time.

use serde::{Deserialize, Serialize};
use strategy_lab_core::{
    Candle, EquityPoint, ReturnPoint, Signal, TimestampMs, Trade, TradeSide,
};
use tracing::trace;

use crate::costs::CostModel;

/// The single open position, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Position {
    #[default]
    Flat,
    Long(OpenPosition),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPosition {
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: TimestampMs,
}

impl Position {
    /// Units currently held.
    pub fn quantity(&self) -> f64 {
        match self {
            Position::Flat => 0.0,
            Position::Long(open) => open.quantity,
        }
    }
}

/// Per-candle series and trade log produced by one simulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutput {
    pub equity_curve: Vec<EquityPoint>,
    /// Period returns in percent.
    pub returns: Vec<ReturnPoint>,
    pub trades: Vec<Trade>,
}

/// Cash plus position, advanced one candle at a time.
#[derive(Debug, Clone, Copy)]
struct Account {
    capital: f64,
    position: Position,
}

impl Account {
    fn step(&mut self, signal: Signal, candle: &Candle, costs: &CostModel) -> Option<Trade> {
        match (self.position, signal) {
            (Position::Flat, Signal::Buy) => {
                self.open(candle, costs);
                None
            }
            (Position::Long(open), Signal::Sell) => Some(self.close(open, candle, costs)),
            (Position::Flat, Signal::Sell | Signal::Hold)
            | (Position::Long(_), Signal::Buy | Signal::Hold) => None,
        }
    }

    fn open(&mut self, candle: &Candle, costs: &CostModel) {
        let entry_price = costs.buy_fill(candle.close);
        // Charged on the whole cash balance at the fill price, not on the notional.
        let commission = costs.entry_commission(entry_price, self.capital);
        let quantity = (self.capital - commission) / entry_price;
        if quantity > 0.0 {
            self.capital -= commission;
            self.position = Position::Long(OpenPosition {
                entry_price,
                quantity,
                entry_time: candle.timestamp,
            });
            trace!(entry_price, quantity, commission, "position opened");
        }
    }

    fn close(&mut self, open: OpenPosition, candle: &Candle, costs: &CostModel) -> Trade {
        let exit_price = costs.sell_fill(candle.close);
        let commission = costs.commission(exit_price * open.quantity);
        self.capital += exit_price * open.quantity - commission;
        self.position = Position::Flat;

        let pnl = (exit_price - open.entry_price) * open.quantity - commission;
        trace!(exit_price, pnl, commission, "position closed");
        Trade {
            entry_time: open.entry_time,
            exit_time: candle.timestamp,
            entry_price: open.entry_price,
            exit_price,
            quantity: open.quantity,
            side: TradeSide::Long,
            pnl,
            pnl_percent: (exit_price - open.entry_price) / open.entry_price * 100.0,
        }
    }

    fn equity(&self, close: f64) -> f64 {
        match self.position {
            Position::Flat => self.capital,
            Position::Long(open) => self.capital + open.quantity * close,
        }
    }
}

/// Long-only, single-asset trade simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSimulator {
    initial_capital: f64,
    costs: CostModel,
}

impl TradeSimulator {
    pub fn new(initial_capital: f64, costs: CostModel) -> Self {
        Self {
            initial_capital,
            costs,
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Replays `signals` over `candles`. Missing signals count as hold and surplus
    /// signals are ignored. A position still open at the end stays open and is valued
    /// at the last close.
    pub fn run(&self, candles: &[Candle], signals: &[Signal]) -> SimulationOutput {
        let mut account = Account {
            capital: self.initial_capital,
            position: Position::Flat,
        };
        let mut out = SimulationOutput {
            equity_curve: Vec::with_capacity(candles.len()),
            returns: Vec::with_capacity(candles.len()),
            trades: Vec::new(),
        };
        let mut prev_equity = self.initial_capital;

        for (i, candle) in candles.iter().enumerate() {
            let signal = signals.get(i).copied().unwrap_or_default();
            if let Some(trade) = account.step(signal, candle, &self.costs) {
                out.trades.push(trade);
            }

            let equity = account.equity(candle.close);
            out.equity_curve.push(EquityPoint {
                timestamp: candle.timestamp,
                equity,
            });
            out.returns.push(ReturnPoint {
                timestamp: candle.timestamp,
                return_pct: (equity - prev_equity) / prev_equity * 100.0,
            });
            prev_equity = equity;
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::flat(i as i64 * 86_400_000, c))
            .collect()
    }

    #[test]
    fn reference_round_trip() {
        let sim = TradeSimulator::new(10_000.0, CostModel::new(0.001, 0.0005));
        let out = sim.run(
            &candles(&[100.0, 110.0, 105.0]),
            &[Signal::Hold, Signal::Buy, Signal::Sell],
        );

        assert_eq!(out.trades.len(), 1);
        let trade = &out.trades[0];
        let entry = 110.0 * 1.0005;
        let exit = 105.0 * 0.9995;
        let entry_commission = entry * 10_000.0 * 0.001;
        let quantity = (10_000.0 - entry_commission) / entry;
        let exit_commission = exit * quantity * 0.001;

        assert!((trade.entry_price - 110.055).abs() < 1e-9);
        assert!((trade.exit_price - 104.9475).abs() < 1e-9);
        assert!((trade.quantity - quantity).abs() < 1e-9);
        assert!((entry_commission - 1_100.55).abs() < 1e-9);
        assert!((trade.quantity - 80.8637).abs() < 1e-4);
        assert!((trade.pnl - ((exit - entry) * quantity - exit_commission)).abs() < 1e-9);
        assert!(trade.pnl < 0.0);
        assert!((trade.pnl_percent - (exit - entry) / entry * 100.0).abs() < 1e-9);
        assert_eq!(trade.entry_time, 86_400_000);
        assert_eq!(trade.exit_time, 2 * 86_400_000);

        assert_eq!(out.equity_curve[0].equity, 10_000.0);
        let cash = 10_000.0 - entry_commission;
        assert!((out.equity_curve[1].equity - (cash + quantity * 110.0)).abs() < 1e-9);
        let final_capital = cash + exit * quantity - exit_commission;
        assert!((out.equity_curve[2].equity - final_capital).abs() < 1e-9);
    }

    #[test]
    fn entry_commission_above_capital_opens_nothing() {
        // 2000 * 1.0 * 0.001 > 1, so the commission exceeds the cash balance.
        let sim = TradeSimulator::new(10_000.0, CostModel::new(0.001, 0.0));
        let out = sim.run(
            &candles(&[2_000.0, 2_100.0, 2_200.0]),
            &[Signal::Buy, Signal::Hold, Signal::Sell],
        );
        assert!(out.trades.is_empty());
        assert!(out.equity_curve.iter().all(|p| p.equity == 10_000.0));
    }

    #[test]
    fn all_hold_keeps_equity_flat() {
        let sim = TradeSimulator::new(5_000.0, CostModel::default());
        let out = sim.run(&candles(&[1.0, 50.0, 3.0, 80.0]), &[Signal::Hold; 4]);
        assert!(out.trades.is_empty());
        assert!(out.equity_curve.iter().all(|p| p.equity == 5_000.0));
        assert!(out.returns.iter().all(|r| r.return_pct == 0.0));
    }

    #[test]
    fn redundant_signals_are_ignored() {
        let sim = TradeSimulator::new(1_000.0, CostModel::zero());
        let out = sim.run(
            &candles(&[10.0, 10.0, 20.0, 20.0, 40.0]),
            &[Signal::Sell, Signal::Buy, Signal::Buy, Signal::Sell, Signal::Sell],
        );
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].quantity, 100.0);
        assert_eq!(out.trades[0].pnl, 1_000.0);
        // Cash is only debited for commission on entry, so proceeds land on top of it.
        assert_eq!(out.equity_curve[1].equity, 2_000.0);
        assert_eq!(out.equity_curve[4].equity, 3_000.0);
    }

    #[test]
    fn missing_signals_are_hold_and_open_position_is_marked_to_market() {
        let sim = TradeSimulator::new(1_000.0, CostModel::zero());
        let out = sim.run(&candles(&[10.0, 15.0, 30.0]), &[Signal::Buy]);
        assert!(out.trades.is_empty());
        assert_eq!(out.equity_curve.len(), 3);
        assert_eq!(out.equity_curve[1].equity, 2_500.0);
        assert_eq!(out.equity_curve[2].equity, 4_000.0);
        assert!((out.returns[2].return_pct - 60.0).abs() < 1e-9);
    }

    #[test]
    fn first_return_is_measured_against_initial_capital() {
        let sim = TradeSimulator::new(1_000.0, CostModel::new(0.01, 0.0));
        let out = sim.run(&candles(&[10.0]), &[Signal::Buy]);
        // 10 * 1000 * 0.01 = 100 paid in commission, then 90 units marked at 10 on top
        // of 900 cash
        assert!((out.equity_curve[0].equity - 1_800.0).abs() < 1e-9);
        assert!((out.returns[0].return_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn nan_prices_propagate() {
        let sim = TradeSimulator::new(1_000.0, CostModel::zero());
        let out = sim.run(&candles(&[10.0, f64::NAN]), &[Signal::Buy, Signal::Hold]);
        assert!(out.equity_curve[1].equity.is_nan());
        assert!(out.returns[1].return_pct.is_nan());
    }

    #[test]
    fn commission_above_capital_prevents_entry() {
        let sim = TradeSimulator::new(1_000.0, CostModel::new(1.5, 0.0));
        let out = sim.run(&candles(&[10.0, 20.0]), &[Signal::Buy, Signal::Sell]);
        assert!(out.trades.is_empty());
        assert_eq!(out.equity_curve[1].equity, 1_000.0);
    }
}
