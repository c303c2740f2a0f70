//! Backtest pipeline for Strategy Lab.
//!
//! A [`BacktestEngine`] validates strategy code, runs it in the script sandbox to get one
//! signal per candle, replays those signals through the [`TradeSimulator`] and summarises
//! the result with the [`StatisticsEngine`].

pub mod costs;
pub mod engine;
pub mod error;
pub mod simulator;
pub mod statistics;

pub use costs::CostModel;
pub use engine::{BacktestEngine, BacktestRun, ExecutionSummary};
pub use error::BacktestError;
pub use simulator::{OpenPosition, Position, SimulationOutput, TradeSimulator};
pub use statistics::StatisticsEngine;
