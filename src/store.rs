//! Persistence for backtest runs.

use async_trait::async_trait;
use backtest_engine::BacktestRun;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::service::RunBacktestParams;

/// Most records returned by [`BacktestStore::list`].
pub const LIST_LIMIT: usize = 50;

/// Default number of records [`InMemoryBacktestStore`] keeps before evicting the oldest.
pub const DEFAULT_RETAINED_RECORDS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// One recorded backtest, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRecord {
    pub id: Uuid,
    pub strategy_id: Option<String>,
    pub status: RunStatus,
    pub parameters: RunBacktestParams,
    pub result: Option<BacktestRun>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BacktestRecord {
    pub fn summary(&self) -> BacktestSummary {
        BacktestSummary {
            id: self.id,
            strategy_id: self.strategy_id.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Listing view of a record, without parameters or results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub id: Uuid,
    pub strategy_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BacktestStore: Send + Sync {
    async fn save(&self, record: BacktestRecord);

    async fn get(&self, id: Uuid) -> Option<BacktestRecord>;

    /// Newest first, at most [`LIST_LIMIT`] entries.
    async fn list(&self) -> Vec<BacktestSummary>;
}

/// Process-local store; records are lost on restart.
///
/// Holds at most `capacity` records. Saving past that drops the oldest by `started_at`.
#[derive(Debug)]
pub struct InMemoryBacktestStore {
    records: RwLock<Vec<BacktestRecord>>,
    capacity: usize,
}

impl Default for InMemoryBacktestStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_RECORDS)
    }
}

impl InMemoryBacktestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl BacktestStore for InMemoryBacktestStore {
    async fn save(&self, record: BacktestRecord) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        while records.len() > self.capacity {
            let oldest = records
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| r.started_at)
                .map(|(index, _)| index);
            match oldest {
                Some(index) => {
                    let evicted = records.remove(index);
                    debug!(id = %evicted.id, "evicted oldest backtest record");
                }
                None => break,
            }
        }
    }

    async fn get(&self, id: Uuid) -> Option<BacktestRecord> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    async fn list(&self) -> Vec<BacktestSummary> {
        let records = self.records.read();
        let mut summaries: Vec<BacktestSummary> =
            records.iter().map(BacktestRecord::summary).collect();
        // Reversed first so records sharing a timestamp stay newest first.
        summaries.reverse();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.truncate(LIST_LIMIT);
        summaries
    }
}
