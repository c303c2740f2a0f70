use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use market_data::{
    CacheConfig, CachedProvider, CandleCache, FileProvider, MarketDataError, MarketDataProvider,
    MarketDataQuery, MarketDataResult,
};
use strategy_lab_core::Candle;

const DAY: i64 = 86_400_000;
const JAN_1_2024: i64 = 1_704_067_200_000;

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("market-data-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_candles(dir: &Path, file: &str, timestamps: &[i64]) {
    let candles: Vec<Candle> = timestamps
        .iter()
        .map(|&ts| Candle::flat(ts, (ts / DAY) as f64))
        .collect();
    std::fs::write(dir.join(file), serde_json::to_vec(&candles).unwrap()).unwrap();
}

#[tokio::test]
async fn file_provider_filters_and_sorts() {
    let dir = scratch_dir();
    write_candles(
        &dir,
        "BTC-USDT_1d.json",
        &[
            JAN_1_2024 + 3 * DAY,
            JAN_1_2024 - DAY,
            JAN_1_2024,
            JAN_1_2024 + DAY,
            JAN_1_2024 + 2 * DAY,
        ],
    );

    let provider = FileProvider::new(&dir);
    let query = MarketDataQuery::parse("BTC/USDT", "1d", "2024-01-01", "2024-01-03").unwrap();
    let candles = provider.fetch(&query).await.unwrap();

    let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp).collect();
    assert_eq!(
        timestamps,
        vec![JAN_1_2024, JAN_1_2024 + DAY, JAN_1_2024 + 2 * DAY]
    );
    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test]
async fn file_provider_reports_missing_and_malformed_files() {
    let dir = scratch_dir();
    std::fs::write(dir.join("AAPL_1h.json"), b"{ not json").unwrap();
    let provider = FileProvider::new(&dir);

    let missing = MarketDataQuery::parse("MSFT", "1h", "2024-01-01", "2024-01-02").unwrap();
    assert!(matches!(
        provider.fetch(&missing).await,
        Err(MarketDataError::NotFound { .. })
    ));

    let malformed = MarketDataQuery::parse("AAPL", "1h", "2024-01-01", "2024-01-02").unwrap();
    assert!(matches!(
        provider.fetch(&malformed).await,
        Err(MarketDataError::Parse { .. })
    ));

    let invalid = MarketDataQuery::parse("../../etc", "1h", "2024-01-01", "2024-01-02").unwrap();
    assert!(matches!(
        provider.fetch(&invalid).await,
        Err(MarketDataError::InvalidSymbol(_))
    ));
    std::fs::remove_dir_all(dir).ok();
}

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl MarketDataProvider for CountingProvider {
    async fn fetch(&self, query: &MarketDataQuery) -> MarketDataResult<Arc<[Candle]>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::from(vec![Candle::flat(query.start_ms(), 1.0)]))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

#[tokio::test]
async fn cached_provider_only_asks_once_per_query() {
    let inner = Arc::new(CountingProvider::default());
    let cache = Arc::new(CandleCache::default());
    let provider = CachedProvider::new(Arc::clone(&inner), Arc::clone(&cache));

    let a = MarketDataQuery::parse("AAPL", "1d", "2024-01-01", "2024-02-01").unwrap();
    let b = MarketDataQuery::parse("AAPL", "1d", "2024-01-02", "2024-02-01").unwrap();
    provider.fetch(&a).await.unwrap();
    provider.fetch(&a).await.unwrap();
    provider.fetch(&b).await.unwrap();

    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
    assert_eq!(provider.name(), "counting");

    cache.invalidate(&a);
    provider.fetch(&a).await.unwrap();
    assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn expired_cache_entries_are_refetched() {
    let inner = Arc::new(CountingProvider::default());
    let cache = Arc::new(CandleCache::new(CacheConfig {
        ttl_secs: 0,
        capacity: 8,
    }));
    let provider = CachedProvider::new(Arc::clone(&inner), cache);

    let q = MarketDataQuery::parse("AAPL", "1d", "2024-01-01", "2024-02-01").unwrap();
    provider.fetch(&q).await.unwrap();
    provider.fetch(&q).await.unwrap();
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
}
