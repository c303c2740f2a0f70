//! Backtest orchestration: market data in, recorded run out.

use std::sync::Arc;
use std::time::Instant;

use backtest_engine::{BacktestEngine, BacktestError, BacktestRun};
use chrono::Utc;
use market_data::{
    CachedProvider, CandleCache, FileProvider, MarketDataError, MarketDataProvider,
    MarketDataQuery,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use strategy_lab_core::BacktestRequest;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, BacktestDefaults};
use crate::store::{BacktestRecord, BacktestStore, BacktestSummary, InMemoryBacktestStore, RunStatus};

/// Parameters for a backtest whose candles are loaded by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunBacktestParams {
    pub strategy_code: String,
    /// Symbols to test; only the first is simulated
    #[serde(default)]
    pub assets: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    pub initial_capital: Option<f64>,
    pub commission: Option<f64>,
    pub slippage: Option<f64>,
    pub strategy_id: Option<String>,
}

fn default_timeframe() -> String {
    "1h".to_string()
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no assets specified")]
    NoAssets,

    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),
}

/// Loads candles, runs the engine and records every attempt.
#[derive(Clone)]
pub struct BacktestService {
    engine: BacktestEngine,
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn BacktestStore>,
    defaults: BacktestDefaults,
}

impl std::fmt::Debug for BacktestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestService")
            .field("provider", &self.provider.name())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl BacktestService {
    pub fn new(
        engine: BacktestEngine,
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn BacktestStore>,
        defaults: BacktestDefaults,
    ) -> Self {
        Self {
            engine,
            provider,
            store,
            defaults,
        }
    }

    /// File-backed candles behind a cache, and an in-memory run store.
    pub fn from_config(config: &AppConfig) -> Self {
        let cache = Arc::new(CandleCache::new(config.market_data.cache.clone()));
        let provider = CachedProvider::new(FileProvider::new(&config.market_data.data_dir), cache);
        Self::new(
            BacktestEngine::new(config.sandbox.clone()),
            Arc::new(provider),
            Arc::new(InMemoryBacktestStore::new()),
            config.backtest,
        )
    }

    pub fn engine(&self) -> &BacktestEngine {
        &self.engine
    }

    pub fn defaults(&self) -> BacktestDefaults {
        self.defaults
    }

    /// Runs a backtest on caller-supplied candles. Nothing is recorded in the store.
    pub async fn run_request(
        &self,
        request: BacktestRequest,
        cancel: CancellationToken,
    ) -> Result<BacktestRun, BacktestError> {
        let started = Instant::now();
        let outcome = self.engine.run_async(request, cancel).await;
        record_metrics(&outcome, started);
        outcome
    }

    /// Loads candles for the first asset, runs the backtest and records the attempt,
    /// whether it succeeded or not.
    #[instrument(skip_all, fields(assets = ?params.assets, timeframe = %params.timeframe))]
    pub async fn run(
        &self,
        params: RunBacktestParams,
        cancel: CancellationToken,
    ) -> Result<BacktestRecord, ServiceError> {
        let started_at = Utc::now();
        let outcome = self.execute(&params, cancel).await;

        let mut record = BacktestRecord {
            id: Uuid::new_v4(),
            strategy_id: params.strategy_id.clone(),
            status: RunStatus::Completed,
            parameters: params,
            result: None,
            error: None,
            started_at,
            completed_at: None,
        };

        match outcome {
            Ok(run) => {
                record.result = Some(run);
                record.completed_at = Some(Utc::now());
                info!(id = %record.id, "backtest recorded");
                self.store.save(record.clone()).await;
                Ok(record)
            }
            Err(err) => {
                warn!(id = %record.id, error = %err, "backtest failed");
                record.status = RunStatus::Failed;
                record.error = Some(err.to_string());
                self.store.save(record).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        params: &RunBacktestParams,
        cancel: CancellationToken,
    ) -> Result<BacktestRun, ServiceError> {
        let symbol = params.assets.first().ok_or(ServiceError::NoAssets)?;
        if params.assets.len() > 1 {
            warn!(
                symbol = %symbol,
                ignored = params.assets.len() - 1,
                "only the first asset is simulated"
            );
        }

        let query = MarketDataQuery::parse(
            symbol,
            &params.timeframe,
            &params.start_date,
            &params.end_date,
        )?;
        let candles = self.provider.fetch(&query).await?;

        let request = BacktestRequest {
            strategy_code: params.strategy_code.clone(),
            data: candles.to_vec(),
            initial_capital: params.initial_capital.unwrap_or(self.defaults.initial_capital),
            commission: params.commission.unwrap_or(self.defaults.commission),
            slippage: params.slippage.unwrap_or(self.defaults.slippage),
        };
        Ok(self.run_request(request, cancel).await?)
    }

    pub async fn get(&self, id: Uuid) -> Option<BacktestRecord> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Vec<BacktestSummary> {
        self.store.list().await
    }
}

fn record_metrics(outcome: &Result<BacktestRun, BacktestError>, started: Instant) {
    histogram!(
        "backtest_duration_seconds",
        started.elapsed().as_secs_f64()
    );
    match outcome {
        Ok(run) => {
            counter!("backtests_total", 1, "outcome" => "completed");
            if run.is_degraded() {
                counter!(
                    "sandbox_degraded_total",
                    1,
                    "state" => run.execution.state.as_str()
                );
            }
        }
        Err(err) => counter!("backtests_total", 1, "outcome" => err.kind()),
    }
}
