use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strategy_lab_core::TimestampMs;

use crate::error::{MarketDataError, MarketDataResult};
use crate::timeframe::Timeframe;

/// One request for historical candles. Both ends of the range are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MarketDataQuery {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> MarketDataResult<Self> {
        if start > end {
            return Err(MarketDataError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            start,
            end,
        })
    }

    /// Builds a query from user-facing date strings.
    ///
    /// A bare `YYYY-MM-DD` start means the beginning of that day; a bare end date
    /// covers the whole day.
    pub fn parse(symbol: &str, timeframe: &str, start: &str, end: &str) -> MarketDataResult<Self> {
        let timeframe = timeframe.parse()?;
        let start = parse_bound(start, NaiveTime::MIN)?;
        let end = parse_bound(end, end_of_day())?;
        Self::new(symbol, timeframe, start, end)
    }

    pub fn start_ms(&self) -> TimestampMs {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> TimestampMs {
        self.end.timestamp_millis()
    }

    pub fn contains(&self, timestamp: TimestampMs) -> bool {
        (self.start_ms()..=self.end_ms()).contains(&timestamp)
    }
}

impl fmt::Display for MarketDataQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.symbol,
            self.timeframe,
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

fn parse_bound(value: &str, time_of_day: NaiveTime) -> MarketDataResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(time_of_day).and_utc())
        .map_err(|_| MarketDataError::InvalidDate {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_dates_cover_whole_days() {
        let q = MarketDataQuery::parse("BTC/USDT", "1d", "2024-01-01", "2024-01-02").unwrap();
        assert_eq!(q.start_ms(), 1_704_067_200_000);
        assert_eq!(q.end_ms(), 1_704_067_200_000 + 2 * 86_400_000 - 1);
        assert!(q.contains(q.end_ms()));
        assert!(!q.contains(q.end_ms() + 1));
    }

    #[test]
    fn rfc3339_bounds_are_taken_verbatim() {
        let q = MarketDataQuery::parse(
            "AAPL",
            "1h",
            "2024-01-01T10:00:00Z",
            "2024-01-01T12:00:00+00:00",
        )
        .unwrap();
        assert_eq!(q.end_ms() - q.start_ms(), 2 * 3_600_000);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            MarketDataQuery::parse("AAPL", "1h", "2024-02-01", "2024-01-01"),
            Err(MarketDataError::InvalidRange { .. })
        ));
        assert!(matches!(
            MarketDataQuery::parse("AAPL", "1h", "yesterday", "2024-01-01"),
            Err(MarketDataError::InvalidDate { .. })
        ));
        assert!(matches!(
            MarketDataQuery::parse("AAPL", "3d", "2024-01-01", "2024-01-01"),
            Err(MarketDataError::UnsupportedTimeframe(_))
        ));
    }

    #[test]
    fn display_matches_cache_key_layout() {
        let q = MarketDataQuery::parse("AAPL", "1d", "2024-01-01", "2024-03-01").unwrap();
        assert_eq!(q.to_string(), "AAPL_1d_2024-01-01_2024-03-01");
    }
}
