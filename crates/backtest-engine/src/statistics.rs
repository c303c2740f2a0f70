//! Summary statistics over a finished simulation.
//!
//! Ratios are annualised with 252 periods per year regardless of candle timeframe, and
//! CAGR uses calendar time between the first and last candle.

use statrs::statistics::Statistics;
use strategy_lab_core::{DrawdownPoint, EquityPoint, ReturnPoint, SummaryStats, Trade};

/// Periods per year used to annualise Sharpe, Sortino and volatility.
pub const PERIODS_PER_YEAR: f64 = 252.0;

const MS_PER_DAY: f64 = 86_400_000.0;
const DAYS_PER_YEAR: f64 = 365.0;

/// Computes [`SummaryStats`] and the drawdown series.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsEngine;

impl StatisticsEngine {
    /// Headline statistics. `returns` holds per-period returns in percent.
    pub fn summarize(
        equity: &[EquityPoint],
        returns: &[ReturnPoint],
        trades: &[Trade],
        initial_capital: f64,
    ) -> SummaryStats {
        let (Some(first), Some(last)) = (equity.first(), equity.last()) else {
            return SummaryStats::default();
        };

        let fractional: Vec<f64> = returns.iter().map(|r| r.return_pct / 100.0).collect();
        let (avg_return, std_dev) = if fractional.is_empty() {
            (0.0, 0.0)
        } else {
            (fractional.iter().mean(), fractional.iter().population_std_dev())
        };

        let cagr = cagr(initial_capital, last.equity, first.timestamp, last.timestamp);
        let max_drawdown = max_drawdown(equity, initial_capital);

        SummaryStats {
            total_return: (last.equity - initial_capital) / initial_capital * 100.0,
            cagr,
            sharpe: if std_dev > 0.0 {
                avg_return / std_dev * PERIODS_PER_YEAR.sqrt()
            } else {
                0.0
            },
            sortino: sortino(&fractional, avg_return),
            max_drawdown,
            calmar: if max_drawdown > 0.0 {
                cagr / max_drawdown
            } else {
                0.0
            },
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            volatility: std_dev * PERIODS_PER_YEAR.sqrt() * 100.0,
            total_trades: trades.len(),
        }
    }

    /// Percentage below the running peak at every point, the peak starting at the first
    /// equity value.
    pub fn drawdown_series(equity: &[EquityPoint]) -> Vec<DrawdownPoint> {
        let Some(first) = equity.first() else {
            return Vec::new();
        };
        let mut peak = first.equity;
        equity
            .iter()
            .map(|point| {
                if point.equity > peak {
                    peak = point.equity;
                }
                DrawdownPoint {
                    timestamp: point.timestamp,
                    drawdown: (peak - point.equity) / peak * 100.0,
                }
            })
            .collect()
    }
}

/// Compound annual growth in percent; 0 when no calendar time elapsed.
pub fn cagr(initial: f64, final_equity: f64, start_ms: i64, end_ms: i64) -> f64 {
    // Timestamps come from caller JSON; subtracting as floats cannot overflow.
    let days = (end_ms as f64 - start_ms as f64) / MS_PER_DAY;
    let years = days / DAYS_PER_YEAR;
    if years > 0.0 {
        ((final_equity / initial).powf(1.0 / years) - 1.0) * 100.0
    } else {
        0.0
    }
}

/// Annualised Sortino ratio. The downside deviation divides by the full series length.
pub fn sortino(returns: &[f64], avg_return: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let downside_variance = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let downside_dev = downside_variance.sqrt();

    if downside_dev > 0.0 {
        avg_return / downside_dev * PERIODS_PER_YEAR.sqrt()
    } else {
        0.0
    }
}

/// Largest decline from a running peak, in percent. The peak starts at `initial_capital`.
pub fn max_drawdown(equity: &[EquityPoint], initial_capital: f64) -> f64 {
    let mut peak = initial_capital;
    let mut max_drawdown = 0.0;
    for point in equity {
        if point.equity > peak {
            peak = point.equity;
        }
        let drawdown = (peak - point.equity) / peak * 100.0;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }
    max_drawdown
}

/// Share of trades with strictly positive pnl, in percent.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    wins as f64 / trades.len() as f64 * 100.0
}

/// Gross profit over gross loss.
///
/// Infinite when something was won and nothing lost; 0 when nothing was won or lost.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let loss: f64 = trades
        .iter()
        .filter(|t| t.pnl < 0.0)
        .map(|t| t.pnl.abs())
        .sum();

    if loss > 0.0 {
        profit / loss
    } else if profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strategy_lab_core::TradeSide;

    const DAY: i64 = 86_400_000;

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: i as i64 * DAY,
                equity,
            })
            .collect()
    }

    fn returns_of(initial: f64, equity: &[EquityPoint]) -> Vec<ReturnPoint> {
        let mut prev = initial;
        equity
            .iter()
            .map(|p| {
                let r = ReturnPoint {
                    timestamp: p.timestamp,
                    return_pct: (p.equity - prev) / prev * 100.0,
                };
                prev = p.equity;
                r
            })
            .collect()
    }

    fn trade(pnl: f64) -> Trade {
        Trade {
            entry_time: 0,
            exit_time: DAY,
            entry_price: 100.0,
            exit_price: 100.0,
            quantity: 1.0,
            side: TradeSide::Long,
            pnl,
            pnl_percent: 0.0,
        }
    }

    #[test]
    fn flat_equity_has_zero_risk_ratios() {
        let eq = curve(&[1_000.0; 10]);
        let stats = StatisticsEngine::summarize(&eq, &returns_of(1_000.0, &eq), &[], 1_000.0);
        assert_eq!(stats.sharpe, 0.0);
        assert_eq!(stats.sortino, 0.0);
        assert_eq!(stats.volatility, 0.0);
        assert_eq!(stats.max_drawdown, 0.0);
        assert_eq!(stats.calmar, 0.0);
        assert_eq!(stats.total_return, 0.0);
        assert_eq!(stats.cagr, 0.0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.profit_factor, 0.0);
        assert_eq!(stats.total_trades, 0);
    }

    #[test]
    fn single_candle_has_no_elapsed_time() {
        let eq = curve(&[1_100.0]);
        let stats = StatisticsEngine::summarize(&eq, &returns_of(1_000.0, &eq), &[], 1_000.0);
        assert!((stats.total_return - 10.0).abs() < 1e-9);
        assert_eq!(stats.cagr, 0.0);
    }

    #[test]
    fn cagr_over_one_year() {
        let value = cagr(1_000.0, 1_210.0, 0, 365 * 2 * DAY);
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let eq = vec![
            EquityPoint {
                timestamp: i64::MIN,
                equity: 1_000.0,
            },
            EquityPoint {
                timestamp: i64::MAX,
                equity: 2_000.0,
            },
        ];
        let stats = StatisticsEngine::summarize(&eq, &returns_of(1_000.0, &eq), &[], 1_000.0);
        assert!(stats.cagr.is_finite());
        assert!(stats.cagr > 0.0 && stats.cagr < 1e-6);
        assert_eq!(cagr(1_000.0, 2_000.0, i64::MAX, i64::MIN), 0.0);
    }

    #[test]
    fn max_drawdown_peak_starts_at_initial_capital() {
        let eq = curve(&[900.0, 950.0, 1_200.0, 600.0]);
        assert!((max_drawdown(&eq, 1_000.0) - 50.0).abs() < 1e-9);
        let below = curve(&[800.0, 900.0]);
        assert!((max_drawdown(&below, 1_000.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn drawdown_series_peak_starts_at_first_equity() {
        let eq = curve(&[800.0, 600.0, 1_000.0, 900.0]);
        let dd = StatisticsEngine::drawdown_series(&eq);
        let values: Vec<f64> = dd.iter().map(|p| p.drawdown).collect();
        assert_eq!(values[0], 0.0);
        assert!((values[1] - 25.0).abs() < 1e-9);
        assert_eq!(values[2], 0.0);
        assert!((values[3] - 10.0).abs() < 1e-9);
        assert_eq!(dd[3].timestamp, 3 * DAY);
    }

    #[test]
    fn sortino_divides_by_full_length() {
        let r = [0.02, -0.01, 0.0, -0.01];
        let avg = 0.0;
        assert_eq!(sortino(&r, avg), 0.0);
        let avg = 0.01;
        let downside = ((0.0001 + 0.0001) / 4.0_f64).sqrt();
        assert!((sortino(&r, avg) - avg / downside * 252.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn sharpe_and_volatility_use_population_deviation() {
        let eq = curve(&[1_100.0, 990.0]);
        let returns = returns_of(1_000.0, &eq);
        let stats = StatisticsEngine::summarize(&eq, &returns, &[], 1_000.0);
        // returns 0.10 and -0.10: mean 0, population std 0.10
        assert!(stats.sharpe.abs() < 1e-12);
        assert!((stats.volatility - 0.10 * 252.0_f64.sqrt() * 100.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_edges() {
        assert_eq!(profit_factor(&[]), 0.0);
        assert_eq!(profit_factor(&[trade(5.0), trade(1.0)]), f64::INFINITY);
        assert_eq!(profit_factor(&[trade(0.0), trade(-3.0)]), 0.0);
        assert_eq!(profit_factor(&[trade(0.0)]), 0.0);
        assert!((profit_factor(&[trade(6.0), trade(-2.0), trade(-1.0)]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn win_rate_counts_strictly_positive_trades() {
        assert_eq!(win_rate(&[]), 0.0);
        assert_eq!(win_rate(&[trade(1.0), trade(0.0), trade(-1.0), trade(2.0)]), 50.0);
    }

    #[test]
    fn empty_curve_yields_default_stats() {
        assert_eq!(
            StatisticsEngine::summarize(&[], &[], &[], 1_000.0),
            SummaryStats::default()
        );
        assert!(StatisticsEngine::drawdown_series(&[]).is_empty());
    }
}
