//! Application configuration.
//!
//! Values are layered: built-in defaults, then `config/default.toml`, then
//! `config/local.toml` (or the file given with `--config`), then `STRATEGY_LAB__*`
//! environment variables with `__` separating nested keys, e.g.
//! `STRATEGY_LAB__SANDBOX__TIMEOUT_MS=2000`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use market_data::CacheConfig;
use serde::{Deserialize, Serialize};
use strategy_engine::SandboxConfig;
use strategy_lab_core::{DEFAULT_COMMISSION_RATE, DEFAULT_INITIAL_CAPITAL, DEFAULT_SLIPPAGE_RATE};
use tracing::info;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "STRATEGY_LAB";

/// Top-level configuration for the CLI and the HTTP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Limits applied to every strategy execution
    pub sandbox: SandboxConfig,
    /// Defaults for parameters a request leaves out
    pub backtest: BacktestDefaults,
    /// Where candles come from and how long they are cached
    pub market_data: MarketDataConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address and port
    pub bind_address: SocketAddr,
    /// Largest accepted request body in bytes
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8787),
            max_payload_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestDefaults {
    pub initial_capital: f64,
    pub commission: f64,
    pub slippage: f64,
}

impl Default for BacktestDefaults {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            commission: DEFAULT_COMMISSION_RATE,
            slippage: DEFAULT_SLIPPAGE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    /// Directory holding `<SYMBOL>_<timeframe>.json` candle files
    pub data_dir: PathBuf,
    pub cache: CacheConfig,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache: CacheConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Directory for the daily rolling log file
    pub directory: PathBuf,
    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: PathBuf::from("logs"),
            file_prefix: "strategy-lab.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads configuration, using `path` instead of `config/local.toml` when given.
    ///
    /// Logging is usually not initialised yet, so this stays silent; call
    /// [`AppConfig::log_summary`] once a subscriber is installed.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(path.unwrap_or("config/local")).required(path.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let app_config: AppConfig = builder.build()?.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Records the settings that matter when reading later log lines.
    pub fn log_summary(&self) {
        info!(
            bind_address = %self.server.bind_address,
            sandbox_timeout_ms = self.sandbox.timeout_ms,
            data_dir = %self.market_data.data_dir.display(),
            log_dir = %self.logging.directory.display(),
            "configuration loaded"
        );
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sandbox.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Sandbox timeout must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.capabilities.is_empty() {
            return Err(ConfigError::Message(
                "Sandbox must grant at least one capability".to_string(),
            ));
        }

        if !(self.backtest.initial_capital.is_finite() && self.backtest.initial_capital > 0.0) {
            return Err(ConfigError::Message(
                "Default initial capital must be a positive number".to_string(),
            ));
        }

        for (name, rate) in [
            ("commission", self.backtest.commission),
            ("slippage", self.backtest.slippage),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(ConfigError::Message(format!(
                    "Default {name} rate must be in [0, 1)"
                )));
            }
        }

        if self.market_data.cache.capacity == 0 {
            return Err(ConfigError::Message(
                "Market data cache capacity must be greater than 0".to_string(),
            ));
        }

        if self.server.max_payload_size == 0 {
            return Err(ConfigError::Message(
                "Max payload size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
