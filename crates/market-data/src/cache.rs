//! Caller-owned candle cache with time-based expiry and a capacity bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strategy_lab_core::Candle;
use tracing::trace;

use crate::query::MarketDataQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds an entry stays fresh
    pub ttl_secs: u64,
    /// Most queries kept at once; the least recently used is evicted first
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug)]
struct Entry {
    candles: Arc<[Candle]>,
    stored_at: Instant,
}

/// Candles keyed by `(symbol, timeframe, start, end)`.
///
/// Entries live in recency order: a hit moves its entry to the back, and eviction takes
/// from the front.
#[derive(Debug)]
pub struct CandleCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<IndexMap<MarketDataQuery, Entry>>,
}

impl Default for CandleCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CandleCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            capacity: config.capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Fresh candles for `query`, if cached. Expired entries are dropped on sight.
    pub fn get(&self, query: &MarketDataQuery) -> Option<Arc<[Candle]>> {
        let mut entries = self.entries.lock();
        let index = entries.get_index_of(query)?;
        if entries[index].stored_at.elapsed() >= self.ttl {
            entries.shift_remove_index(index);
            trace!(%query, "cache entry expired");
            return None;
        }
        let last = entries.len() - 1;
        entries.move_index(index, last);
        entries.get(query).map(|entry| Arc::clone(&entry.candles))
    }

    pub fn insert(&self, query: MarketDataQuery, candles: Arc<[Candle]>) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&query);
        while entries.len() >= self.capacity {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                trace!(query = %evicted, "cache entry evicted");
            }
        }
        entries.insert(
            query,
            Entry {
                candles,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, query: &MarketDataQuery) -> bool {
        self.entries.lock().shift_remove(query).is_some()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
