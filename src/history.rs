//! History queries for dashboard bootstrap and backfill.
//!
//! Without a date the newest `default_limit` readings come back; with a date,
//! the readings of that UTC day (capped by `ranged_limit` if one is set).
//! Results are always oldest first. Nothing here writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use crate::domain::{Reading, TimeRange};
use crate::error::QueryError;
use crate::store::{with_timeout, ReadingQuery, ReadingStore};

pub const DEFAULT_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryPolicy {
    /// cap for queries without a date
    pub default_limit: usize,
    /// cap for single-day queries, `None` returns the whole day
    pub ranged_limit: Option<usize>,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            ranged_limit: None,
        }
    }
}

pub struct HistoryService {
    store: Arc<dyn ReadingStore>,
    policy: HistoryPolicy,
    io_timeout: Option<Duration>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn ReadingStore>, policy: HistoryPolicy) -> Self {
        Self {
            store,
            policy,
            io_timeout: None,
        }
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub async fn get_history(&self, date: Option<NaiveDate>) -> Result<Vec<Reading>, QueryError> {
        let query = match date {
            Some(day) => ReadingQuery::within(TimeRange::for_day(day), self.policy.ranged_limit),
            None => ReadingQuery::latest(self.policy.default_limit),
        };

        let readings = with_timeout(self.io_timeout, self.store.query(query))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, ?date, "history query failed");
                QueryError::from(e)
            })?;

        tracing::debug!(?date, points = readings.len(), "history served");
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn reading_at(at: DateTime<Utc>) -> Reading {
        Reading {
            temperature: 23.0,
            moisture: 48.0,
            ph: 6.9,
            timestamp: at,
        }
    }

    async fn seeded(at: &[DateTime<Utc>]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for t in at {
            store.append(reading_at(*t)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_unranged_returns_newest_hundred_oldest_first() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let times: Vec<_> = (0..150).map(|i| base + chrono::Duration::minutes(i)).collect();
        let service = HistoryService::new(seeded(&times).await, HistoryPolicy::default());

        let history = service.get_history(None).await.unwrap();
        assert_eq!(history.len(), 100);
        assert_eq!(history.first().unwrap().timestamp, times[50]);
        assert_eq!(history.last().unwrap().timestamp, times[149]);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_day_filter_is_half_open() {
        let times = [
            Utc.with_ymd_and_hms(2024, 7, 1, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2024, 7, 2, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 7, 2, 13, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 7, 2, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2024, 7, 3, 0, 0, 0).unwrap(),
        ];
        let service = HistoryService::new(seeded(&times).await, HistoryPolicy::default());

        let day = NaiveDate::from_ymd_opt(2024, 7, 2).unwrap();
        let history = service.get_history(Some(day)).await.unwrap();
        let got: Vec<_> = history.iter().map(|r| r.timestamp).collect();
        assert_eq!(got, times[1..4].to_vec());
    }

    #[tokio::test]
    async fn test_day_filter_uncapped_by_default() {
        let base = Utc.with_ymd_and_hms(2024, 8, 5, 0, 0, 0).unwrap();
        let times: Vec<_> = (0..300).map(|i| base + chrono::Duration::minutes(i)).collect();
        let store = seeded(&times).await;

        let day = NaiveDate::from_ymd_opt(2024, 8, 5).unwrap();
        let uncapped = HistoryService::new(store.clone(), HistoryPolicy::default());
        assert_eq!(uncapped.get_history(Some(day)).await.unwrap().len(), 300);

        let capped = HistoryService::new(
            store,
            HistoryPolicy {
                default_limit: 100,
                ranged_limit: Some(10),
            },
        );
        let history = capped.get_history(Some(day)).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history.last().unwrap().timestamp, times[299]);
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let base = Utc.with_ymd_and_hms(2024, 2, 2, 2, 0, 0).unwrap();
        let times: Vec<_> = (0..5).map(|i| base + chrono::Duration::seconds(i)).collect();
        let store = seeded(&times).await;
        let service = HistoryService::new(store.clone(), HistoryPolicy::default());

        let first = service.get_history(None).await.unwrap();
        let second = service.get_history(None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_empty_day() {
        let service = HistoryService::new(Arc::new(MemoryStore::new()), HistoryPolicy::default());
        let day = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert!(service.get_history(Some(day)).await.unwrap().is_empty());
    }
}
