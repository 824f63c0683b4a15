//! ==============================================================================
//! store/ - append-only reading store
//! ==============================================================================
//!
//! purpose:
//!     the single source of truth for readings. the services only see the
//!     `ReadingStore` port; adapters decide where the bytes live.
//!
//! adapters:
//!     - file.rs: json lines on disk, fsync per append, sorted in-memory index
//!     - memory.rs: non-durable, for tests and throwaway runs
//!
//! ordering:
//!     both adapters keep readings sorted by timestamp. readings with equal
//!     timestamps stay in append order.
//!
//! ==============================================================================

mod file;
mod memory;

pub use file::JsonlStore;
pub use memory::MemoryStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Reading, StoreId, TimeRange};
use crate::error::StorageError;

/// selection passed to `ReadingStore::query`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReadingQuery {
    /// only readings with `start <= timestamp < end`
    pub range: Option<TimeRange>,
    /// keep only the most recent `limit` readings of the selection
    pub limit: Option<usize>,
}

impl ReadingQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            range: None,
            limit: Some(limit),
        }
    }

    pub fn within(range: TimeRange, limit: Option<usize>) -> Self {
        Self {
            range: Some(range),
            limit,
        }
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// durably record one reading
    async fn append(&self, reading: Reading) -> Result<StoreId, StorageError>;

    /// readings matching `query`, oldest first
    async fn query(&self, query: ReadingQuery) -> Result<Vec<Reading>, StorageError>;

    /// number of stored readings
    async fn len(&self) -> Result<usize, StorageError>;
}

/// insert keeping `readings` sorted by timestamp, after any equal timestamps
pub(crate) fn insert_sorted(readings: &mut Vec<Reading>, reading: Reading) {
    let at = readings.partition_point(|r| r.timestamp <= reading.timestamp);
    readings.insert(at, reading);
}

/// apply a query to a timestamp-sorted slice
pub(crate) fn select(readings: &[Reading], query: &ReadingQuery) -> Vec<Reading> {
    let window = match query.range {
        Some(range) => {
            let lo = readings.partition_point(|r| r.timestamp < range.start);
            let hi = readings.partition_point(|r| r.timestamp < range.end).max(lo);
            &readings[lo..hi]
        }
        None => readings,
    };

    let skip = query
        .limit
        .map(|limit| window.len().saturating_sub(limit))
        .unwrap_or(0);
    window[skip..].to_vec()
}

/// bound a store operation; `None` waits forever
pub async fn with_timeout<T, F>(limit: Option<Duration>, op: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| StorageError::Timeout(limit))?,
        None => op.await,
    }
}
