//! Strategy Lab CLI
//!
//! Validates strategy scripts, runs one-off backtests from local files and serves the
//! HTTP API.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use backtest_engine::BacktestEngine;
use clap::{Parser, Subcommand};
use strategy_lab::config::{AppConfig, LoggingConfig};
use strategy_lab::service::BacktestService;
use strategy_lab::web::{self, AppState};
use strategy_lab_core::{BacktestRequest, Candle};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path, layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backtest a strategy file against a JSON candle file
    Run {
        /// Strategy script
        #[arg(short, long)]
        strategy: PathBuf,
        /// JSON array of candles
        #[arg(short, long)]
        data: PathBuf,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        initial_capital: Option<f64>,
        #[arg(long)]
        commission: Option<f64>,
        #[arg(long)]
        slippage: Option<f64>,
    },
    /// Screen a strategy file without running it
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
    },
    /// Start the HTTP API
    Serve {
        /// Overrides server.bind_address
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&config.logging, &level)?;
    config.log_summary();

    match args.command {
        Command::Run {
            strategy,
            data,
            output,
            initial_capital,
            commission,
            slippage,
        } => {
            let strategy_code = read_to_string(&strategy).await?;
            let raw = read_to_string(&data).await?;
            let candles: Vec<Candle> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON candle array", data.display()))?;

            let request = BacktestRequest {
                strategy_code,
                data: candles,
                initial_capital: initial_capital.unwrap_or(config.backtest.initial_capital),
                commission: commission.unwrap_or(config.backtest.commission),
                slippage: slippage.unwrap_or(config.backtest.slippage),
            };

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                ctrl_c.cancel();
            });

            let engine = BacktestEngine::new(config.sandbox.clone());
            let run = engine.run_async(request, cancel).await?;
            let json = serde_json::to_string_pretty(&run)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(path = %path.display(), "result written");
                }
                None => println!("{json}"),
            }
        }
        Command::Validate { strategy } => {
            let code = read_to_string(&strategy).await?;
            let result = BacktestEngine::new(config.sandbox.clone()).validate(&code);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_valid {
                bail!("{} failed validation", strategy.display());
            }
        }
        Command::Serve { bind } => {
            let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
            let metrics_handle = recorder.handle();
            metrics::set_boxed_recorder(Box::new(recorder))
                .context("failed to install metrics recorder")?;
            info!("Prometheus metrics recorder initialized");

            let addr = bind.unwrap_or(config.server.bind_address);
            let state = AppState::new(BacktestService::from_config(&config), Some(metrics_handle));
            let app = web::router(state, config.server.max_payload_size);
            if let Err(err) = web::serve(addr, app, shutdown_signal()).await {
                error!("API server failed: {err:?}");
                return Err(err);
            }
            info!("Strategy Lab shut down gracefully");
        }
    }

    Ok(())
}

async fn read_to_string(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn init_tracing(logging: &LoggingConfig, level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let file_appender =
        tracing_appender::rolling::daily(&logging.directory, &logging.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output, so console logs go to stderr.
    let console_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(filter());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    // The writer stops flushing once its guard drops, and it has to outlive main.
    Box::leak(Box::new(guard));
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
        Err(err) => error!("Failed to listen for shutdown signal: {:?}", err),
    }
}
