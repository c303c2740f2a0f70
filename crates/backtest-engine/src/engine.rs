//! The end-to-end pipeline: validate, execute, simulate, summarise.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strategy_engine::{
    CodeValidator, ExecutionReport, ExecutionState, SandboxConfig, SandboxError, ScriptSandbox,
    SignalGenerator, ValidatedStrategy, ValidationResult,
};
use strategy_lab_core::{BacktestRequest, BacktestResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::costs::CostModel;
use crate::error::{BacktestError, Result};
use crate::simulator::TradeSimulator;
use crate::statistics::StatisticsEngine;

/// How signal generation went, without the signals themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub state: ExecutionState,
    pub failure: Option<SandboxError>,
    pub diagnostics: Vec<String>,
    pub duration_ms: u64,
}

impl From<&ExecutionReport> for ExecutionSummary {
    fn from(report: &ExecutionReport) -> Self {
        Self {
            state: report.state,
            failure: report.failure.clone(),
            diagnostics: report.diagnostics.clone(),
            duration_ms: u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A finished backtest plus what the validator and sandbox had to say about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    #[serde(flatten)]
    pub result: BacktestResult,
    pub execution: ExecutionSummary,
    /// Validator warnings for the strategy code
    pub warnings: Vec<String>,
}

impl BacktestRun {
    /// True when the signals came from a failed or cancelled execution.
    pub fn is_degraded(&self) -> bool {
        self.execution.state != ExecutionState::Completed
    }
}

/// Runs backtests. Holds no per-run state, so one instance can serve any number of
/// concurrent requests.
pub struct BacktestEngine<G = ScriptSandbox> {
    validator: Arc<CodeValidator>,
    generator: Arc<G>,
}

impl<G> Clone for BacktestEngine<G> {
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
            generator: Arc::clone(&self.generator),
        }
    }
}

impl<G> std::fmt::Debug for BacktestEngine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestEngine").finish_non_exhaustive()
    }
}

impl Default for BacktestEngine<ScriptSandbox> {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl BacktestEngine<ScriptSandbox> {
    pub fn new(sandbox: SandboxConfig) -> Self {
        Self::with_generator(ScriptSandbox::new(sandbox))
    }
}

impl<G: SignalGenerator + 'static> BacktestEngine<G> {
    /// Uses `generator` in place of the script sandbox.
    pub fn with_generator(generator: G) -> Self {
        Self {
            validator: Arc::new(CodeValidator::new()),
            generator: Arc::new(generator),
        }
    }

    /// Screens strategy code without running anything.
    pub fn validate(&self, code: &str) -> ValidationResult {
        self.validator.check(code)
    }

    pub fn run(&self, request: &BacktestRequest) -> Result<BacktestRun> {
        self.run_with_cancel(request, &CancellationToken::new())
    }

    /// Runs the full pipeline. Cancelling `cancel` stops the strategy script, and the run
    /// then completes on all-hold signals.
    #[instrument(
        name = "backtest",
        skip_all,
        fields(candles = request.data.len(), initial_capital = request.initial_capital)
    )]
    pub fn run_with_cancel(
        &self,
        request: &BacktestRequest,
        cancel: &CancellationToken,
    ) -> Result<BacktestRun> {
        let started = Instant::now();
        let strategy = self
            .validator
            .validate(&request.strategy_code)
            .map_err(BacktestError::Validation)?;
        if request.data.is_empty() {
            return Err(BacktestError::EmptyMarketData);
        }

        let report = self.generator.generate(&strategy, &request.data, cancel);
        let run = simulate(request, &strategy, &report);

        info!(
            trades = run.result.summary_stats.total_trades,
            total_return = run.result.summary_stats.total_return,
            execution = run.execution.state.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backtest finished"
        );
        Ok(run)
    }

    /// Runs the pipeline on the blocking pool.
    pub async fn run_async(
        &self,
        request: BacktestRequest,
        cancel: CancellationToken,
    ) -> Result<BacktestRun> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.run_with_cancel(&request, &cancel))
            .await
            .map_err(|e| BacktestError::Worker(e.to_string()))?
    }
}

fn simulate(
    request: &BacktestRequest,
    strategy: &ValidatedStrategy,
    report: &ExecutionReport,
) -> BacktestRun {
    let simulator = TradeSimulator::new(
        request.initial_capital,
        CostModel::new(request.commission, request.slippage),
    );
    let output = simulator.run(&request.data, &report.signals);

    let drawdown_series = StatisticsEngine::drawdown_series(&output.equity_curve);
    let summary_stats = StatisticsEngine::summarize(
        &output.equity_curve,
        &output.returns,
        &output.trades,
        request.initial_capital,
    );

    BacktestRun {
        result: BacktestResult {
            equity_curve: output.equity_curve,
            drawdown_series,
            returns_series: output.returns,
            trade_log: output.trades,
            summary_stats,
        },
        execution: ExecutionSummary::from(report),
        warnings: strategy.warnings().to_vec(),
    }
}
