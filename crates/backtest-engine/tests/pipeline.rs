use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backtest_engine::{BacktestEngine, BacktestError};
use strategy_engine::{
    ExecutionReport, ExecutionState, SandboxConfig, SignalGenerator, ValidatedStrategy,
};
use strategy_lab_core::{BacktestRequest, Candle, Signal};
use tokio_util::sync::CancellationToken;

/// Replays a fixed signal list and counts how often it was asked to.
#[derive(Default)]
struct ScriptedGenerator {
    signals: Vec<Signal>,
    calls: AtomicUsize,
}

impl SignalGenerator for ScriptedGenerator {
    fn generate(
        &self,
        _strategy: &ValidatedStrategy,
        candles: &[Candle],
        _cancel: &CancellationToken,
    ) -> ExecutionReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut signals = self.signals.clone();
        signals.resize(candles.len(), Signal::Hold);
        ExecutionReport {
            state: ExecutionState::Completed,
            signals,
            failure: None,
            diagnostics: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

fn request(code: &str, closes: &[f64]) -> BacktestRequest {
    BacktestRequest {
        strategy_code: code.to_string(),
        data: closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::flat(i as i64 * 3_600_000, c))
            .collect(),
        initial_capital: 10_000.0,
        commission: 0.001,
        slippage: 0.0005,
    }
}

const HOLDS: &str = r#"fn strategy(data) { data.map(|c| "hold") }"#;

#[test]
fn rejected_code_never_reaches_the_generator() {
    let generator = Arc::new(ScriptedGenerator::default());
    let engine = BacktestEngine::with_generator(Arc::clone(&generator));

    for code in [
        r#"import "fs" as fs; fn strategy(data) { [] }"#,
        r#"fn strategy(data) { eval("[]") }"#,
        r#"fn strategy(data) { let p = process.env; [] }"#,
    ] {
        let err = engine.run(&request(code, &[1.0, 2.0])).unwrap_err();
        match err {
            BacktestError::Validation(result) => {
                assert!(!result.is_valid);
                assert!(!result.errors.is_empty());
            }
            other => panic!("expected a validation error, got {other}"),
        }
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_data_never_reaches_the_generator() {
    let generator = Arc::new(ScriptedGenerator::default());
    let engine = BacktestEngine::with_generator(Arc::clone(&generator));
    assert_eq!(
        engine.run(&request(HOLDS, &[])).unwrap_err(),
        BacktestError::EmptyMarketData
    );
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn generator_signals_drive_the_simulation() {
    let generator = Arc::new(ScriptedGenerator {
        signals: vec![Signal::Buy, Signal::Hold, Signal::Sell, Signal::Buy],
        calls: AtomicUsize::new(0),
    });
    let engine = BacktestEngine::with_generator(Arc::clone(&generator));

    let run = engine
        .run(&request(HOLDS, &[100.0, 120.0, 130.0, 90.0, 80.0]))
        .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(run.result.trade_log.len(), 1);
    assert!(run.result.trade_log[0].pnl > 0.0);
    assert_eq!(run.result.summary_stats.profit_factor, f64::INFINITY);
    assert_eq!(run.result.summary_stats.win_rate, 100.0);
    // Second entry is still open and marked to market at the last close.
    assert!(run.result.equity_curve[4].equity < run.result.equity_curve[3].equity);
}

#[test]
fn infinite_profit_factor_serializes_as_null() {
    let generator = ScriptedGenerator {
        signals: vec![Signal::Buy, Signal::Sell],
        calls: AtomicUsize::new(0),
    };
    let run = BacktestEngine::with_generator(generator)
        .run(&request(HOLDS, &[100.0, 200.0]))
        .unwrap();
    let json = serde_json::to_value(&run).unwrap();
    assert!(json["summaryStats"]["profitFactor"].is_null());
    assert_eq!(json["summaryStats"]["totalTrades"], 1);
}

#[tokio::test]
async fn runaway_script_times_out_to_all_hold() {
    let engine =
        BacktestEngine::new(SandboxConfig::default().with_timeout(Duration::from_millis(50)));
    let code = r#"
        fn strategy(data) {
            let x = 0;
            loop { x += 1; }
        }
    "#;
    let run = engine
        .run_async(request(code, &[1.0, 2.0, 3.0]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(run.execution.state, ExecutionState::TimedOut);
    assert!(run.result.trade_log.is_empty());
    assert!(run.result.equity_curve.iter().all(|p| p.equity == 10_000.0));
}

#[tokio::test]
async fn cancelling_the_token_stops_a_running_script() {
    let engine =
        BacktestEngine::new(SandboxConfig::default().with_timeout(Duration::from_secs(30)));
    let code = r#"
        fn strategy(data) {
            let x = 0;
            loop { x += 1; }
        }
    "#;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let run = engine
        .run_async(request(code, &[1.0, 2.0]), cancel)
        .await
        .unwrap();
    assert_eq!(run.execution.state, ExecutionState::Cancelled);
    assert!(run.is_degraded());
    assert_eq!(run.result.equity_curve.len(), 2);
}
