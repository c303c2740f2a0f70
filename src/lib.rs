//! # Strategy Lab
//!
//! Backtesting for untrusted trading strategies. Strategy scripts are screened by a static
//! validator, executed in a capability-restricted interpreter with hard time and resource
//! limits, and their signals are replayed through a single-asset trade simulator that
//! reports an equity curve, trade log and risk statistics.
//!
//! ## Architecture
//!
//! - `strategy-lab-core`: candles, signals, trades and result types
//! - `strategy-engine`: validator, script sandbox and indicators
//! - `backtest-engine`: trade simulator, statistics and the end-to-end pipeline
//! - `market-data`: candle providers and the query cache
//!
//! This crate wires them into a service with configuration, an HTTP API and a CLI.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications, missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod service;
pub mod store;
pub mod web;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
    }
}
