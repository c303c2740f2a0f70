use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use strategy_lab_core::Candle;
use tracing::{debug, instrument};

use crate::cache::CandleCache;
use crate::error::{MarketDataError, MarketDataResult};
use crate::query::MarketDataQuery;
use crate::symbol::validate_symbol;

/// Source of historical candles.
///
/// Implementations return candles inside the query range, ascending by timestamp. An
/// empty vector is a valid answer.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, query: &MarketDataQuery) -> MarketDataResult<Arc<[Candle]>>;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl<P: MarketDataProvider + ?Sized> MarketDataProvider for Arc<P> {
    async fn fetch(&self, query: &MarketDataQuery) -> MarketDataResult<Arc<[Candle]>> {
        (**self).fetch(query).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Reads JSON candle arrays from `<dir>/<SYMBOL>_<timeframe>.json`.
///
/// Pair separators are written as `-` in file names, so `BTC/USDT` at `1h` lives in
/// `BTC-USDT_1h.json`.
#[derive(Debug, Clone)]
pub struct FileProvider {
    dir: PathBuf,
}

impl FileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, query: &MarketDataQuery) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.json",
            query.symbol.replace('/', "-"),
            query.timeframe
        ))
    }
}

#[async_trait]
impl MarketDataProvider for FileProvider {
    #[instrument(skip_all, fields(query = %query))]
    async fn fetch(&self, query: &MarketDataQuery) -> MarketDataResult<Arc<[Candle]>> {
        validate_symbol(&query.symbol)?;
        let path = self.path_for(query);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(MarketDataError::NotFound {
                    symbol: query.symbol.clone(),
                    timeframe: query.timeframe.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let mut candles: Vec<Candle> =
            serde_json::from_slice(&raw).map_err(|source| MarketDataError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        candles.retain(|c| query.contains(c.timestamp));
        candles.sort_by_key(|c| c.timestamp);

        debug!(candles = candles.len(), path = %path.display(), "candles loaded");
        Ok(candles.into())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Serves repeat queries from a [`CandleCache`] before asking the inner provider.
#[derive(Debug, Clone)]
pub struct CachedProvider<P> {
    inner: P,
    cache: Arc<CandleCache>,
}

impl<P: MarketDataProvider> CachedProvider<P> {
    pub fn new(inner: P, cache: Arc<CandleCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<CandleCache> {
        &self.cache
    }
}

#[async_trait]
impl<P: MarketDataProvider> MarketDataProvider for CachedProvider<P> {
    async fn fetch(&self, query: &MarketDataQuery) -> MarketDataResult<Arc<[Candle]>> {
        if let Some(candles) = self.cache.get(query) {
            debug!(%query, "candle cache hit");
            return Ok(candles);
        }
        let candles = self.inner.fetch(query).await?;
        self.cache.insert(query.clone(), Arc::clone(&candles));
        Ok(candles)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
